use entity::UserRecord;
use serde::{Deserialize, Serialize};

/// 对外暴露的用户信息
///
/// 不包含配对码，配对码只通过 `get_or_generate_code` 交给持有者本人。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub profile_picture_url: Option<String>,
    pub partner_id: Option<String>,
}

impl User {
    pub fn has_partner(&self) -> bool {
        self.partner_id.is_some()
    }
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            display_name: record.display_name,
            profile_picture_url: record.profile_picture_url,
            partner_id: record.partner_id,
        }
    }
}

/// 上游认证给出的资料，用于注册/刷新用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            profile_picture_url: None,
        }
    }

    pub fn with_picture(mut self, url: impl Into<String>) -> Self {
        self.profile_picture_url = Some(url.into());
        self
    }
}
