use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PairingError, PairingResult};

/// 配对码可用字符：A-Z, 0-9
const DEFAULT_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DEFAULT_CODE_LENGTH: usize = 6;
/// 15 分钟
const DEFAULT_TTL_SECS: u64 = 15 * 60;
/// 36^6 的码空间下，20 次仍碰撞说明存储或随机源出了问题
const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// 配对协议配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairingConfig {
    pub alphabet: String,
    pub code_length: usize,
    pub ttl_secs: u64,
    /// getOrGenerateCode 碰撞重试上限（含首次）
    pub max_attempts: u32,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.to_string(),
            code_length: DEFAULT_CODE_LENGTH,
            ttl_secs: DEFAULT_TTL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PairingConfig {
    pub fn with_alphabet(mut self, alphabet: impl Into<String>) -> Self {
        self.alphabet = alphabet.into();
        self
    }

    pub fn with_code_length(mut self, code_length: usize) -> Self {
        self.code_length = code_length;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// 超出 chrono 可表示范围时返回 `None`
    pub fn ttl(&self) -> Option<chrono::TimeDelta> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
    }

    pub fn validate(&self) -> PairingResult<()> {
        if self.alphabet.is_empty() {
            return Err(invalid("alphabet must not be empty"));
        }
        if !self.alphabet.is_ascii() {
            return Err(invalid("alphabet must be ASCII"));
        }
        let unique: HashSet<char> = self.alphabet.chars().collect();
        if unique.len() != self.alphabet.len() {
            return Err(invalid("alphabet contains duplicate characters"));
        }
        if self.code_length == 0 {
            return Err(invalid("codeLength must be positive"));
        }
        if self.ttl_secs == 0 || self.ttl().is_none() {
            return Err(invalid("ttlSecs out of range"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("maxAttempts must be positive"));
        }
        Ok(())
    }

    /// 解析 JSON 配置，缺省字段取默认值
    pub fn from_json_str(json: &str) -> PairingResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> PairingResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let config = Self::from_json_str(&json)?;
        tracing::info!("Loaded pairing config from {}", path.display());
        Ok(config)
    }
}

fn invalid(msg: &str) -> PairingError {
    PairingError::InvalidConfig(msg.to_string())
}
