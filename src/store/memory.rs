//! 进程内文档存储
//!
//! 乐观并发控制（OCC）：每个文档记录最近一次修改的 `revision`，
//! 事务提交时校验读集合中的 revision 与查询结果是否仍然一致。
//! 全局锁只在提交的临界区内持有，读操作只取读锁。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use entity::{pairing_code, user, PairingCodeRecord, UserRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{DocumentStore, Transaction};
use crate::error::{StoreError, StoreResult};

/// 带修改版本的文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versioned<T> {
    pub revision: u64,
    pub value: T,
}

/// 存储的完整状态，也是持久化快照格式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// 最近一次提交的全局 revision，文档 revision 从 1 开始
    pub revision: u64,
    pub users: BTreeMap<String, Versioned<UserRecord>>,
    pub pairing_codes: BTreeMap<String, Versioned<PairingCodeRecord>>,
}

impl StoreSnapshot {
    /// 文档当前 revision，不存在为 0
    fn revision_of(&self, key: &DocKey) -> u64 {
        match key {
            DocKey::User(id) => self.users.get(id).map_or(0, |d| d.revision),
            DocKey::Code(code) => self.pairing_codes.get(code).map_or(0, |d| d.revision),
        }
    }

    /// 按 pairing_code 查询，返回 (id, revision)，按 id 排序
    fn users_with_code(&self, code: &str) -> Vec<(String, u64)> {
        self.users
            .values()
            .filter(|d| d.value.pairing_code.as_deref() == Some(code))
            .map(|d| (d.value.id.clone(), d.revision))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DocKey {
    User(String),
    Code(String),
}

impl DocKey {
    fn collection(&self) -> &'static str {
        match self {
            DocKey::User(_) => user::COLLECTION,
            DocKey::Code(_) => pairing_code::COLLECTION,
        }
    }

    fn key(&self) -> &str {
        match self {
            DocKey::User(k) | DocKey::Code(k) => k,
        }
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    UpdateUser(UserRecord),
    SetUser(UserRecord),
    CreateCode(PairingCodeRecord),
    DeleteCode(String),
}

/// 进程内事务型文档存储，clone 后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: Arc::new(RwLock::new(snapshot)),
        }
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.state.read().await.clone()
    }

    /// 从 JSON 快照文件加载，文件不存在时返回空存储
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
                debug!(
                    "Loaded store snapshot from {} at revision {}",
                    path.display(),
                    snapshot.revision
                );
                Ok(Self::from_snapshot(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// 先写同目录临时文件再 rename，写入中断不会截断已有快照
    pub async fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(
            "Saved store snapshot to {} at revision {}",
            path.display(),
            snapshot.revision
        );
        Ok(())
    }

    // ============ 事务外的只读访问 ============

    pub async fn user(&self, id: &str) -> Option<UserRecord> {
        self.state.read().await.users.get(id).map(|d| d.value.clone())
    }

    pub async fn code(&self, code: &str) -> Option<PairingCodeRecord> {
        self.state
            .read()
            .await
            .pairing_codes
            .get(code)
            .map(|d| d.value.clone())
    }

    pub async fn code_count(&self) -> usize {
        self.state.read().await.pairing_codes.len()
    }

    /// 绕过事务直接写入用户，不做任何不变量检查
    #[cfg(test)]
    pub(crate) async fn put_user(&self, record: UserRecord) {
        let mut state = self.state.write().await;
        state.revision += 1;
        let revision = state.revision;
        state.users.insert(
            record.id.clone(),
            Versioned {
                revision,
                value: record,
            },
        );
    }

    /// 绕过事务直接写入配对码
    #[cfg(test)]
    pub(crate) async fn put_code(&self, record: PairingCodeRecord) {
        let mut state = self.state.write().await;
        state.revision += 1;
        let revision = state.revision;
        state.pairing_codes.insert(
            record.code.clone(),
            Versioned {
                revision,
                value: record,
            },
        );
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> StoreResult<Self::Tx> {
        let tx = MemoryTransaction {
            id: Uuid::new_v4(),
            state: self.state.clone(),
            reads: HashMap::new(),
            queries: HashMap::new(),
            writes: Vec::new(),
        };
        debug!(tx = %tx.id, "Transaction started");
        Ok(tx)
    }
}

/// [`MemoryStore`] 上的事务
pub struct MemoryTransaction {
    id: Uuid,
    state: Arc<RwLock<StoreSnapshot>>,
    /// 读集合：文档 → 首次读取时的 revision
    reads: HashMap<DocKey, u64>,
    /// 查询集合：pairing_code → 首次查询时的结果
    queries: HashMap<String, Vec<(String, u64)>>,
    writes: Vec<WriteOp>,
}

impl MemoryTransaction {
    fn record_read(&mut self, key: DocKey, revision: u64) {
        self.reads.entry(key).or_insert(revision);
    }

    /// 校验阶段，在写锁内执行
    fn validate(&self, state: &StoreSnapshot) -> StoreResult<()> {
        for op in &self.writes {
            if let WriteOp::CreateCode(record) = op {
                if state.pairing_codes.contains_key(&record.code) {
                    return Err(StoreError::AlreadyExists {
                        collection: pairing_code::COLLECTION,
                        key: record.code.clone(),
                    });
                }
            }
        }

        self.check_unchanged(state)?;

        for op in &self.writes {
            if let WriteOp::UpdateUser(record) = op {
                if !state.users.contains_key(&record.id) {
                    return Err(StoreError::NotFound {
                        collection: user::COLLECTION,
                        key: record.id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// 读集合与查询结果是否仍与首次读取一致
    ///
    /// 每次读取前也会调用，保证同一事务内看到的数据来自同一时刻。
    fn check_unchanged(&self, state: &StoreSnapshot) -> StoreResult<()> {
        for (key, expected) in &self.reads {
            if state.revision_of(key) != *expected {
                return Err(StoreError::Conflict {
                    collection: key.collection(),
                    key: key.key().to_string(),
                });
            }
        }

        for (code, expected) in &self.queries {
            if state.users_with_code(code) != *expected {
                return Err(StoreError::Conflict {
                    collection: user::COLLECTION,
                    key: format!("pairingCode=={code}"),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn get_user(&mut self, id: &str) -> StoreResult<Option<UserRecord>> {
        let state = self.state.read().await;
        self.check_unchanged(&state)?;
        let doc = state.users.get(id).cloned();
        drop(state);

        self.record_read(DocKey::User(id.to_string()), doc.as_ref().map_or(0, |d| d.revision));
        Ok(doc.map(|d| d.value))
    }

    async fn find_users_by_pairing_code(&mut self, code: &str) -> StoreResult<Vec<UserRecord>> {
        let state = self.state.read().await;
        self.check_unchanged(&state)?;
        let matched = state.users_with_code(code);
        let records: Vec<UserRecord> = matched
            .iter()
            .filter_map(|(id, _)| state.users.get(id).map(|d| d.value.clone()))
            .collect();
        drop(state);

        for (id, revision) in &matched {
            self.record_read(DocKey::User(id.clone()), *revision);
        }
        self.queries.entry(code.to_string()).or_insert(matched);
        Ok(records)
    }

    fn update_user(&mut self, record: UserRecord) {
        self.writes.push(WriteOp::UpdateUser(record));
    }

    fn set_user(&mut self, record: UserRecord) {
        self.writes.push(WriteOp::SetUser(record));
    }

    async fn get_code(&mut self, code: &str) -> StoreResult<Option<PairingCodeRecord>> {
        let state = self.state.read().await;
        self.check_unchanged(&state)?;
        let doc = state.pairing_codes.get(code).cloned();
        drop(state);

        self.record_read(
            DocKey::Code(code.to_string()),
            doc.as_ref().map_or(0, |d| d.revision),
        );
        Ok(doc.map(|d| d.value))
    }

    fn create_code(&mut self, record: PairingCodeRecord) {
        self.writes.push(WriteOp::CreateCode(record));
    }

    fn delete_code(&mut self, code: &str) {
        self.writes.push(WriteOp::DeleteCode(code.to_string()));
    }

    async fn commit(self) -> StoreResult<()> {
        let mut state = self.state.write().await;

        if let Err(e) = self.validate(&state) {
            debug!(tx = %self.id, "Transaction aborted: {}", e);
            return Err(e);
        }

        if self.writes.is_empty() {
            debug!(tx = %self.id, "Read-only transaction committed");
            return Ok(());
        }

        state.revision += 1;
        let revision = state.revision;
        let write_count = self.writes.len();

        for op in self.writes {
            match op {
                WriteOp::UpdateUser(record) | WriteOp::SetUser(record) => {
                    state
                        .users
                        .insert(record.id.clone(), Versioned { revision, value: record });
                }
                WriteOp::CreateCode(record) => {
                    state
                        .pairing_codes
                        .insert(record.code.clone(), Versioned { revision, value: record });
                }
                WriteOp::DeleteCode(code) => {
                    state.pairing_codes.remove(&code);
                }
            }
        }

        debug!(tx = %self.id, revision, write_count, "Transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn code(code: &str) -> PairingCodeRecord {
        PairingCodeRecord {
            code: code.into(),
            expiry: Utc::now() + Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.set_user(UserRecord::new("a", "Alice"));
        tx.create_code(code("AAAAAA"));

        assert!(store.user("a").await.is_none());
        drop(tx);
        assert!(store.user("a").await.is_none());
        assert_eq!(store.code_count().await, 0);
    }

    #[tokio::test]
    async fn create_fails_when_key_exists() {
        let store = MemoryStore::new();
        store.put_code(code("AAAAAA")).await;

        let mut tx = store.begin().await.unwrap();
        tx.create_code(code("AAAAAA"));
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn concurrent_creates_of_same_key_commit_once() {
        let store = MemoryStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.create_code(code("AAAAAA"));
        second.create_code(code("AAAAAA"));

        first.commit().await.unwrap();
        assert!(second.commit().await.unwrap_err().is_already_exists());
        assert_eq!(store.code_count().await, 1);
    }

    #[tokio::test]
    async fn stale_read_aborts_commit() {
        let store = MemoryStore::new();
        store.put_user(UserRecord::new("a", "Alice")).await;

        let mut tx = store.begin().await.unwrap();
        let mut user = tx.get_user("a").await.unwrap().unwrap();

        // 并发修改
        let mut other = store.begin().await.unwrap();
        let mut renamed = other.get_user("a").await.unwrap().unwrap();
        renamed.display_name = "Alicia".into();
        other.update_user(renamed);
        other.commit().await.unwrap();

        user.pairing_code = Some("AAAAAA".into());
        tx.update_user(user);
        tx.create_code(code("AAAAAA"));
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::Conflict { collection: "users", .. })
        ));
        // 整个事务不生效
        assert_eq!(store.code_count().await, 0);
        assert_eq!(store.user("a").await.unwrap().display_name, "Alicia");
    }

    #[tokio::test]
    async fn absent_read_conflicts_with_later_insert() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_code("AAAAAA").await.unwrap().is_none());

        store.put_code(code("AAAAAA")).await;

        tx.set_user(UserRecord::new("a", "Alice"));
        assert!(matches!(
            tx.commit().await,
            Err(StoreError::Conflict { collection: "pairing_codes", .. })
        ));
    }

    #[tokio::test]
    async fn read_after_concurrent_commit_aborts() {
        let store = MemoryStore::new();
        store.put_user(UserRecord::new("a", "Alice")).await;
        store.put_code(code("AAAAAA")).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_code("AAAAAA").await.unwrap().is_some());

        let mut other = store.begin().await.unwrap();
        other.delete_code("AAAAAA");
        other.commit().await.unwrap();

        // 不会看到「码还在但用户已变」这样的混合视图
        assert!(matches!(
            tx.get_user("a").await,
            Err(StoreError::Conflict { collection: "pairing_codes", .. })
        ));
    }

    #[tokio::test]
    async fn query_detects_phantom_match() {
        let store = MemoryStore::new();
        let mut owner = UserRecord::new("a", "Alice");
        owner.pairing_code = Some("AAAAAA".into());
        store.put_user(owner).await;
        store.put_user(UserRecord::new("b", "Bob")).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_users_by_pairing_code("AAAAAA").await.unwrap().len(), 1);

        let mut intruder = store.user("b").await.unwrap();
        intruder.pairing_code = Some("AAAAAA".into());
        store.put_user(intruder).await;

        tx.delete_code("AAAAAA");
        assert!(matches!(tx.commit().await, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn update_of_missing_user_fails() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.update_user(UserRecord::new("ghost", "Ghost"));
        assert!(matches!(tx.commit().await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn commit_applies_all_writes_at_one_revision() {
        let store = MemoryStore::new();
        store.put_code(code("OLD000")).await;

        let mut tx = store.begin().await.unwrap();
        tx.set_user(UserRecord::new("a", "Alice"));
        tx.set_user(UserRecord::new("b", "Bob"));
        tx.delete_code("OLD000");
        tx.delete_code("NOPE00");
        tx.commit().await.unwrap();

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.users["a"].revision, 2);
        assert_eq!(snapshot.users["b"].revision, 2);
        assert!(snapshot.pairing_codes.is_empty());
    }

    #[tokio::test]
    async fn snapshot_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("duet_test_snapshot_{}", Uuid::new_v4()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("store.json");

        // 文件不存在时为空存储
        let empty = MemoryStore::load(&path).await.unwrap();
        assert_eq!(empty.snapshot().await, StoreSnapshot::default());

        let store = MemoryStore::new();
        store.put_user(UserRecord::new("a", "Alice")).await;
        store.put_code(code("AAAAAA")).await;
        store.save(&path).await.unwrap();

        let loaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(loaded.snapshot().await, store.snapshot().await);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn save_replaces_existing_snapshot_without_leftovers() {
        let dir = std::env::temp_dir().join(format!("duet_test_overwrite_{}", Uuid::new_v4()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("store.json");

        let store = MemoryStore::new();
        store.put_user(UserRecord::new("a", "Alice")).await;
        store.save(&path).await.unwrap();

        store.put_user(UserRecord::new("b", "Bob")).await;
        store.put_code(code("AAAAAA")).await;
        store.save(&path).await.unwrap();

        let loaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(loaded.snapshot().await, store.snapshot().await);
        assert!(!temp_path(&path).exists());
        let entries: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("store.json")]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
