use std::sync::Arc;

use entity::{PairingCodeRecord, UserRecord};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::code::{CodeSource, PairingCode, RandomCodes};
use crate::clock::{Clock, SystemClock};
use crate::config::PairingConfig;
use crate::store::{DocumentStore, Transaction};
use crate::user::{User, UserProfile};
use crate::{PairingError, PairingResult};

/// `get_or_generate_code` 的预期结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum CodeOutcome {
    /// 仍有效的旧码或新生成的码
    Issued(PairingCode),
    /// 已有伴侣的用户不能持有配对码
    HasPartner,
}

/// `pair` 的预期结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum PairOutcome {
    /// 配对完成，返回发起方的最新信息
    Paired(User),
    /// 发起方已有伴侣
    HasPartner,
    /// 配对码不存在、已过期或属于发起方自己
    InvalidCode,
}

/// 配对协调器
///
/// 所有对 `partner_id` / `pairing_code` 的修改都经过这里，且都在单个存储事务内完成。
/// 协调器本身不持有锁也不缓存记录，可以被多个请求并发调用。
pub struct PairingManager<S> {
    store: S,
    config: PairingConfig,
    codes: Arc<dyn CodeSource>,
    clock: Arc<dyn Clock>,
}

impl<S: DocumentStore> PairingManager<S> {
    pub fn new(store: S, config: PairingConfig) -> PairingResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            codes: Arc::new(RandomCodes),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_code_source(mut self, codes: Arc<dyn CodeSource>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 注册或刷新用户资料，保留已有的伴侣与配对码
    pub async fn register_user(&self, profile: UserProfile) -> PairingResult<User> {
        let mut tx = self.store.begin().await?;

        let record = match tx.get_user(&profile.id).await? {
            Some(mut existing) => {
                existing.display_name = profile.display_name;
                existing.profile_picture_url = profile.profile_picture_url;
                existing
            }
            None => {
                info!("Registering new user {}", profile.id);
                UserRecord {
                    profile_picture_url: profile.profile_picture_url,
                    ..UserRecord::new(profile.id, profile.display_name)
                }
            }
        };

        tx.set_user(record.clone());
        tx.commit().await?;
        Ok(record.into())
    }

    /// 读取用户，不存在返回 `None`
    pub async fn user(&self, user_id: &str) -> PairingResult<Option<User>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.get_user(user_id).await?.map(User::from))
    }

    /// 获取用户当前有效的配对码，没有则生成一个
    ///
    /// - 已有伴侣：返回 [`CodeOutcome::HasPartner`]，不创建任何文档
    /// - 旧码仍有效：原样返回，不修改用户记录
    /// - 旧码缺失或已过期：生成新码替换
    ///
    /// 候选码在事务外生成，碰撞（`AlreadyExists`）时整体重试，
    /// 超过 `max_attempts` 次返回 [`PairingError::RetriesExhausted`]。
    pub async fn get_or_generate_code(&self, user_id: &str) -> PairingResult<CodeOutcome> {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            let candidate = self.codes.next_code(&self.config);

            match self.try_get_or_generate(user_id, candidate).await {
                Err(PairingError::Store(e)) if e.is_already_exists() => {
                    warn!(
                        "Pairing code collision for user {} (attempt {}/{}): {}",
                        user_id, attempt, max_attempts, e
                    );
                }
                result => return result,
            }
        }

        error!(
            "Failed to generate a unique pairing code for user {} after {} attempts",
            user_id, max_attempts
        );
        Err(PairingError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    async fn try_get_or_generate(
        &self,
        user_id: &str,
        candidate: String,
    ) -> PairingResult<CodeOutcome> {
        let mut tx = self.store.begin().await?;

        let mut user = tx
            .get_user(user_id)
            .await?
            .ok_or_else(|| PairingError::UnknownUser(user_id.to_string()))?;

        if user.has_partner() {
            debug!(tx = %tx.id(), "User {} already has a partner", user_id);
            return Ok(CodeOutcome::HasPartner);
        }

        let now = self.clock.now();

        if let Some(current) = user.pairing_code.clone() {
            match tx.get_code(&current).await? {
                Some(record) if record.is_valid_at(now) => {
                    debug!(tx = %tx.id(), "Reusing pairing code {} for user {}", current, user_id);
                    return Ok(CodeOutcome::Issued(record.into()));
                }
                // 过期的旧码被新码取代
                Some(_) => tx.delete_code(&current),
                None => {}
            }
        }

        let expiry = self
            .config
            .ttl()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                PairingError::InvalidConfig(format!(
                    "ttlSecs {} overflows expiry from {}",
                    self.config.ttl_secs, now
                ))
            })?;
        let issued = PairingCode {
            code: candidate,
            expiry,
        };

        tx.create_code(PairingCodeRecord::from(&issued));
        user.pairing_code = Some(issued.code.clone());
        tx.update_user(user);
        tx.commit().await?;

        info!(
            "Issued pairing code {} for user {}, expires at {}",
            issued.code, user_id, issued.expiry
        );
        Ok(CodeOutcome::Issued(issued))
    }

    /// 用配对码将 `user_id` 与码的持有者配对
    ///
    /// 全部读写在同一事务内完成：双方互设 `partner_id`、清空双方 `pairing_code`，
    /// 并删除被兑换的码以及双方其他未使用的码。
    /// 持有者不唯一或持有者已有伴侣说明存储不变量已被破坏，返回
    /// [`PairingError::ConsistencyViolation`]。
    /// 并发兑换同一个码时至多一个成功，失败方可能收到存储冲突错误。
    pub async fn pair(&self, code: &str, user_id: &str) -> PairingResult<PairOutcome> {
        let mut tx = self.store.begin().await?;

        let mut requester = tx
            .get_user(user_id)
            .await?
            .ok_or_else(|| PairingError::UnknownUser(user_id.to_string()))?;

        if requester.has_partner() {
            debug!(tx = %tx.id(), "User {} already has a partner", user_id);
            return Ok(PairOutcome::HasPartner);
        }

        // 不能兑换自己的码，无论是否过期
        if requester.pairing_code.as_deref() == Some(code) {
            warn!("User {} tried to redeem their own pairing code", user_id);
            return Ok(PairOutcome::InvalidCode);
        }

        let now = self.clock.now();
        match tx.get_code(code).await? {
            Some(record) if record.is_valid_at(now) => {}
            Some(_) => {
                warn!("User {} tried to redeem expired pairing code {}", user_id, code);
                return Ok(PairOutcome::InvalidCode);
            }
            None => {
                warn!("User {} tried to redeem unknown pairing code {}", user_id, code);
                return Ok(PairOutcome::InvalidCode);
            }
        }

        let owners = tx.find_users_by_pairing_code(code).await?;
        let mut owner = match <[UserRecord; 1]>::try_from(owners) {
            Ok([owner]) => owner,
            Err(owners) => {
                let msg = format!(
                    "found {} users with pairing code {}, expected 1",
                    owners.len(),
                    code
                );
                error!(tx = %tx.id(), "{}", msg);
                return Err(PairingError::ConsistencyViolation(msg));
            }
        };

        if let Some(partner_id) = &owner.partner_id {
            let msg = format!(
                "user {} holds pairing code {} but is already partnered with {}",
                owner.id, code, partner_id
            );
            error!(tx = %tx.id(), "{}", msg);
            return Err(PairingError::ConsistencyViolation(msg));
        }

        // 配对后双方都不能再有未使用的码
        let mut consumed = vec![code.to_string()];
        for held in [owner.pairing_code.take(), requester.pairing_code.take()]
            .into_iter()
            .flatten()
        {
            if !consumed.contains(&held) {
                consumed.push(held);
            }
        }

        requester.partner_id = Some(owner.id.clone());
        owner.partner_id = Some(requester.id.clone());

        let owner_id = owner.id.clone();
        tx.update_user(requester.clone());
        tx.update_user(owner);
        for stale in &consumed {
            tx.delete_code(stale);
        }
        tx.commit().await?;

        info!(
            "Paired user {} with user {} using code {}",
            user_id, owner_id, code
        );
        Ok(PairOutcome::Paired(requester.into()))
    }
}
