use serde::{Deserialize, Serialize};

/// 用户集合名
pub const COLLECTION: &str = "users";

/// `users/{id}` 文档
///
/// 不变量：`partner_id` 非空时 `pairing_code` 必为空；
/// 伴侣关系对称（A.partner_id == B.id ⇔ B.partner_id == A.id）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub profile_picture_url: Option<String>,
    pub partner_id: Option<String>,
    /// 当前持有的配对码，最多一个
    pub pairing_code: Option<String>,
}

impl UserRecord {
    /// 新注册用户：未配对、无配对码
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            profile_picture_url: None,
            partner_id: None,
            pairing_code: None,
        }
    }

    pub fn has_partner(&self) -> bool {
        self.partner_id.is_some()
    }
}
