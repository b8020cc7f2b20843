use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use entity::PairingCodeRecord;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::PairingConfig;

/// 返回给调用方的配对码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCode {
    pub code: String,
    pub expiry: DateTime<Utc>,
}

impl From<PairingCodeRecord> for PairingCode {
    fn from(record: PairingCodeRecord) -> Self {
        Self {
            code: record.code,
            expiry: record.expiry,
        }
    }
}

impl From<&PairingCode> for PairingCodeRecord {
    fn from(code: &PairingCode) -> Self {
        Self {
            code: code.code.clone(),
            expiry: code.expiry,
        }
    }
}

/// 从 `alphabet` 中有放回地均匀抽取 `length` 个字符
///
/// 不保证唯一，碰撞由协调器处理。
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8], length: usize) -> String {
    (0..length)
        .filter_map(|_| alphabet.choose(rng).map(|c| *c as char))
        .collect()
}

/// 候选配对码来源
///
/// 协调器在事务之外取候选码，测试可注入固定序列来复现碰撞。
pub trait CodeSource: Send + Sync {
    fn next_code(&self, config: &PairingConfig) -> String;
}

/// 线程本地随机数生成的配对码
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn next_code(&self, config: &PairingConfig) -> String {
        let mut rng = rand::rng();
        generate_code(&mut rng, config.alphabet.as_bytes(), config.code_length)
    }
}

/// 按给定顺序吐出配对码，用完后退回随机生成
#[derive(Debug, Default)]
pub struct ScriptedCodes {
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(codes.into_iter().map(Into::into).collect()),
        }
    }

    /// 剩余未消费的码数量
    pub fn remaining(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }
}

impl CodeSource for ScriptedCodes {
    fn next_code(&self, config: &PairingConfig) -> String {
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| RandomCodes.next_code(config))
    }
}
