//! 持久化记录结构
//!
//! 文档存储中的两个集合：`users`（用户 → 伴侣/配对码）与
//! `pairing_codes`（配对码 → 过期时间）。记录只描述存储形态，
//! 业务规则由 `duet` 的配对协调器负责。

pub mod pairing_code;
pub mod user;

pub use pairing_code::PairingCodeRecord;
pub use user::UserRecord;
