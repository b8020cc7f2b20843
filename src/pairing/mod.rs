//! 配对模块
//!
//! 伴侣配对流程：6 位配对码生成、兑换校验与双向绑定。
//! 核心逻辑在 [`PairingManager`](manager::PairingManager)，
//! 所有状态变更都在单个存储事务内完成。

pub mod code;
pub mod manager;

pub use code::{CodeSource, PairingCode, RandomCodes, ScriptedCodes};
pub use manager::{CodeOutcome, PairOutcome, PairingManager};
