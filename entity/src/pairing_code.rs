use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 配对码集合名
pub const COLLECTION: &str = "pairing_codes";

/// `pairing_codes/{code}` 文档
///
/// 文档本身不记录归属用户，归属通过查询 `users.pairing_code == code` 得到。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCodeRecord {
    /// 文档 key
    pub code: String,
    pub expiry: DateTime<Utc>,
}

impl PairingCodeRecord {
    /// `expiry` 严格晚于 `now` 才算有效
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}
