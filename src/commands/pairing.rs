use crate::pairing::{CodeOutcome, PairOutcome, PairingManager};
use crate::store::DocumentStore;
use crate::user::{User, UserProfile};
use crate::{PairingError, PairingResult};

use super::Task;

/// 执行任务，返回要打印的文本
pub async fn execute<S: DocumentStore>(
    manager: &PairingManager<S>,
    task: Task,
) -> PairingResult<String> {
    match task {
        Task::GeneratePairingCode { user_id } => {
            ensure_user(manager, &user_id).await?;
            generate_pairing_code(manager, &user_id).await
        }
        Task::PairWithCode { user_id, code } => {
            ensure_user(manager, &user_id).await?;
            pair_with_code(manager, &user_id, &code).await
        }
        Task::AutoPair { user_a, user_b } => {
            ensure_user(manager, &user_a).await?;
            ensure_user(manager, &user_b).await?;
            match manager.get_or_generate_code(&user_a).await? {
                CodeOutcome::Issued(code) => {
                    pair_with_code(manager, &user_b, &code.code).await
                }
                CodeOutcome::HasPartner => Ok(format!("{user_a} already has a partner")),
            }
        }
        Task::ShowUser { user_id } => {
            let user = manager
                .user(&user_id)
                .await?
                .ok_or(PairingError::UnknownUser(user_id))?;
            Ok(serde_json::to_string_pretty(&user)?)
        }
    }
}

/// 用户不存在时以 id 作为昵称注册
async fn ensure_user<S: DocumentStore>(
    manager: &PairingManager<S>,
    user_id: &str,
) -> PairingResult<User> {
    match manager.user(user_id).await? {
        Some(user) => Ok(user),
        None => {
            manager
                .register_user(UserProfile::new(user_id, user_id))
                .await
        }
    }
}

async fn generate_pairing_code<S: DocumentStore>(
    manager: &PairingManager<S>,
    user_id: &str,
) -> PairingResult<String> {
    match manager.get_or_generate_code(user_id).await? {
        CodeOutcome::Issued(code) => Ok(format!(
            "Code: {}, Expires: {}",
            code.code,
            code.expiry.to_rfc3339()
        )),
        CodeOutcome::HasPartner => Ok(format!(
            "Cannot get a pairing code: {user_id} already has a partner"
        )),
    }
}

async fn pair_with_code<S: DocumentStore>(
    manager: &PairingManager<S>,
    user_id: &str,
    code: &str,
) -> PairingResult<String> {
    match manager.pair(code, user_id).await? {
        PairOutcome::Paired(user) => Ok(format!(
            "Pairing complete: {} <-> {}",
            user.id,
            user.partner_id.unwrap_or_default()
        )),
        PairOutcome::HasPartner => Ok(format!("{user_id} already has a partner")),
        PairOutcome::InvalidCode => Ok(format!("Invalid pairing code {code}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairingConfig;
    use crate::store::MemoryStore;

    fn manager(store: &MemoryStore) -> PairingManager<MemoryStore> {
        PairingManager::new(store.clone(), PairingConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn auto_pair_goes_through_the_coordinator() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let out = execute(
            &manager,
            Task::AutoPair {
                user_a: "me".into(),
                user_b: "partnerpartner".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(out, "Pairing complete: partnerpartner <-> me");

        let me = store.user("me").await.unwrap();
        assert_eq!(me.display_name, "me");
        assert_eq!(me.partner_id.as_deref(), Some("partnerpartner"));
        assert_eq!(store.code_count().await, 0);

        let again = execute(
            &manager,
            Task::AutoPair {
                user_a: "me".into(),
                user_b: "partnerpartner".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(again, "me already has a partner");
    }

    #[tokio::test]
    async fn generate_then_pair_with_code() {
        let store = MemoryStore::new();
        let manager = manager(&store);

        let out = execute(
            &manager,
            Task::GeneratePairingCode {
                user_id: "a".into(),
            },
        )
        .await
        .unwrap();
        assert!(out.starts_with("Code: "));
        let code = store.user("a").await.unwrap().pairing_code.unwrap();
        assert!(out.contains(&code));

        let bad = execute(
            &manager,
            Task::PairWithCode {
                user_id: "b".into(),
                code: "NOPE00".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(bad, "Invalid pairing code NOPE00");

        let paired = execute(
            &manager,
            Task::PairWithCode {
                user_id: "b".into(),
                code,
            },
        )
        .await
        .unwrap();
        assert_eq!(paired, "Pairing complete: b <-> a");

        let shown = execute(&manager, Task::ShowUser { user_id: "a".into() })
            .await
            .unwrap();
        let user: User = serde_json::from_str(&shown).unwrap();
        assert_eq!(user.partner_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn show_unknown_user_fails() {
        let store = MemoryStore::new();
        assert!(matches!(
            execute(&manager(&store), Task::ShowUser { user_id: "x".into() }).await,
            Err(PairingError::UnknownUser(_))
        ));
    }
}
