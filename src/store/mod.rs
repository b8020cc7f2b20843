//! 事务型文档存储接口
//!
//! 协调器只依赖 [`DocumentStore`] / [`Transaction`] 两个 trait，
//! 所有跨文档不变量都靠存储的事务隔离保证：
//!
//! 1. **读阶段**：事务内的每次读取（含按属性查询）都会记入读集合
//! 2. **写阶段**：写操作只缓存在事务内，提交前对外不可见
//! 3. **校验阶段**：提交时检查 create 的 key 仍不存在、读集合未被并发修改
//! 4. **应用阶段**：校验通过后原子应用全部写入
//!
//! 未提交就 drop 的事务不产生任何效果。
//! 参考实现见 [`memory::MemoryStore`]。

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use entity::{PairingCodeRecord, UserRecord};

use crate::error::StoreResult;

/// 事务型文档存储
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Tx: Transaction;

    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// 单个存储事务
///
/// 读操作立即返回当前已提交的数据；写操作在 [`commit`](Transaction::commit) 时一次性生效。
#[async_trait]
pub trait Transaction: Send {
    /// 本事务的 id，仅用于日志
    fn id(&self) -> uuid::Uuid;

    // === 用户集合 ===

    async fn get_user(&mut self, id: &str) -> StoreResult<Option<UserRecord>>;

    /// 查询 `pairing_code == code` 的全部用户
    async fn find_users_by_pairing_code(&mut self, code: &str) -> StoreResult<Vec<UserRecord>>;

    /// 覆盖已存在的用户文档，提交时不存在则 `NotFound`
    fn update_user(&mut self, record: UserRecord);

    /// 创建或覆盖用户文档
    fn set_user(&mut self, record: UserRecord);

    // === 配对码集合 ===

    async fn get_code(&mut self, code: &str) -> StoreResult<Option<PairingCodeRecord>>;

    /// 提交时 key 已存在则以 `AlreadyExists` 失败，不会覆盖
    fn create_code(&mut self, record: PairingCodeRecord);

    /// 删除配对码文档，不存在时无操作
    fn delete_code(&mut self, code: &str);

    async fn commit(self) -> StoreResult<()>;
}
