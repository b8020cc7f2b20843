//! 开发用任务入口
//!
//! 薄层命令入口，仅负责参数解析和输出格式化，
//! 所有业务逻辑委托给 [`PairingManager`](crate::pairing::PairingManager)。

mod pairing;

pub use pairing::*;

use std::path::PathBuf;

use crate::{PairingError, PairingResult};

/// 快照文件路径环境变量
pub const STORE_PATH_ENV: &str = "DUET_STORE";
/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "DUET_CONFIG";

const DEFAULT_STORE_PATH: &str = "duet-store.json";

const USAGE: &str = "duet <task> [args]\n\
    tasks:\n  \
      generate-pairing-code <user-id>\n  \
      pair-with-code <user-id> <code>\n  \
      auto-pair <user-a> <user-b>\n  \
      show-user <user-id>";

/// 可执行的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    GeneratePairingCode { user_id: String },
    PairWithCode { user_id: String, code: String },
    AutoPair { user_a: String, user_b: String },
    ShowUser { user_id: String },
}

impl Task {
    pub fn parse(args: &[String]) -> PairingResult<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["generate-pairing-code", user_id] => Ok(Task::GeneratePairingCode {
                user_id: user_id.to_string(),
            }),
            ["pair-with-code", user_id, code] => Ok(Task::PairWithCode {
                user_id: user_id.to_string(),
                code: code.trim().to_uppercase(),
            }),
            ["auto-pair", user_a, user_b] if user_a != user_b => Ok(Task::AutoPair {
                user_a: user_a.to_string(),
                user_b: user_b.to_string(),
            }),
            ["show-user", user_id] => Ok(Task::ShowUser {
                user_id: user_id.to_string(),
            }),
            _ => Err(usage()),
        }
    }
}

fn usage() -> PairingError {
    PairingError::Usage(USAGE.to_string())
}

/// 运行环境：快照与配置文件位置
#[derive(Debug, Clone)]
pub struct Settings {
    pub store_path: PathBuf,
    pub config_path: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            store_path: std::env::var_os(STORE_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            config_path: std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_tasks() {
        assert_eq!(
            Task::parse(&args(&["pair-with-code", "b", " q7k2m9 "])).unwrap(),
            Task::PairWithCode {
                user_id: "b".into(),
                code: "Q7K2M9".into()
            }
        );
        assert_eq!(
            Task::parse(&args(&["auto-pair", "a", "b"])).unwrap(),
            Task::AutoPair {
                user_a: "a".into(),
                user_b: "b".into()
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(Task::parse(&args(&[])), Err(PairingError::Usage(_))));
        assert!(Task::parse(&args(&["generate-pairing-code"])).is_err());
        assert!(Task::parse(&args(&["auto-pair", "a", "a"])).is_err());
        assert!(Task::parse(&args(&["unpair", "a"])).is_err());
    }
}
