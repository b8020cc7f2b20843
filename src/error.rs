//! 错误处理模块
//!
//! 分两层：[`StoreError`] 描述文档存储本身的失败，
//! [`PairingError`] 是协调器对调用方暴露的致命错误。
//! 「已有伴侣」「配对码无效」属于预期结果，不在这里，
//! 见 [`CodeOutcome`](crate::pairing::CodeOutcome) 与
//! [`PairOutcome`](crate::pairing::PairOutcome)。

use serde::Serialize;
use thiserror::Error;

/// 文档存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// create 的 key 已存在（配对码碰撞）
    #[error("document {collection}/{key} already exists")]
    AlreadyExists { collection: &'static str, key: String },

    /// 提交时发现读集合已被并发事务修改
    #[error("transaction conflict on {collection}/{key}")]
    Conflict { collection: &'static str, key: String },

    /// update 的文档不存在
    #[error("document {collection}/{key} not found")]
    NotFound { collection: &'static str, key: String },

    /// 快照文件读写错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 快照序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// 协调器统一错误类型
///
/// 注意：`Store` 变体存储原始 [`StoreError`]，
/// 通过自定义 Serialize 实现统一转为 `{ kind, message }` 格式，
/// 调用方（HTTP handler 等）可以直接转发。
#[derive(Debug, Error)]
pub enum PairingError {
    /// 用户记录不存在
    #[error("user {0} not found")]
    UnknownUser(String),

    /// 存储层不变量已被外部破坏，不重试
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// 配对码碰撞重试超过上限
    #[error("gave up generating a unique pairing code after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// 配置不合法
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// 命令行参数错误
    #[error("usage: {0}")]
    Usage(String),

    /// 存储错误（含事务冲突），原样透传
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// 序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 文件系统错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 传递给调用方的序列化错误格式
impl Serialize for PairingError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("PairingError", 2)?;

        let kind = match self {
            PairingError::UnknownUser(_) => "UnknownUser",
            PairingError::ConsistencyViolation(_) => "ConsistencyViolation",
            PairingError::RetriesExhausted { .. } => "RetriesExhausted",
            PairingError::InvalidConfig(_) => "InvalidConfig",
            PairingError::Usage(_) => "Usage",
            PairingError::Store(StoreError::Conflict { .. }) => "StoreConflict",
            PairingError::Store(_) => "Store",
            PairingError::Serialization(_) => "Serialization",
            PairingError::Io(_) => "Io",
        };

        state.serialize_field("kind", kind)?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

// ============ 便捷类型别名 ============

/// 存储层 Result
pub type StoreResult<T> = Result<T, StoreError>;

/// 协调器 Result
pub type PairingResult<T> = Result<T, PairingError>;
