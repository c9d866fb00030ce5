pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::token::{OrderParam, PageParam, Token, TokenAuthInfo, TokenQuery};
use crate::models::validity::{NewValidityPolicy, PolicyType, ValidityPolicy};

/// Persistence of validity policies, always addressed through their token.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Policies of a token, oldest first. `policy_type` narrows the result.
    async fn list_by_token(
        &self,
        token_id: Uuid,
        policy_type: Option<PolicyType>,
    ) -> anyhow::Result<Vec<ValidityPolicy>>;

    async fn batch_create(&self, policies: &[NewValidityPolicy]) -> anyhow::Result<()>;

    /// Remove every policy of a token. Returns the number of rows removed.
    async fn delete_by_token(&self, token_id: Uuid) -> anyhow::Result<u64>;
}

/// Persistence of tokens together with their policy sets.
///
/// `create_token`, `update_token` and `delete_token` are atomic over the token
/// row and all of its policies.
#[async_trait]
pub trait TokenStore: PolicyStore {
    /// Token and windows for `secret`, restricted to tokens of `env_name`.
    async fn get_auth_info(
        &self,
        secret: &str,
        env_name: &str,
    ) -> anyhow::Result<Option<TokenAuthInfo>>;

    /// `(total, page)` of a workspace's tokens matching `query`.
    async fn query_page(
        &self,
        workspace_id: &str,
        query: &TokenQuery,
        page: PageParam,
        order: &OrderParam,
    ) -> anyhow::Result<(i64, Vec<Token>)>;

    /// Whether another token already uses the (scenario, model, env) triple
    /// in the workspace. `exclude` skips the token being updated.
    async fn token_exists(
        &self,
        workspace_id: &str,
        app_scenario_name: &str,
        model_name: &str,
        env_name: &str,
        exclude: Option<Uuid>,
    ) -> anyhow::Result<bool>;

    async fn get_token(&self, id: Uuid) -> anyhow::Result<Option<Token>>;

    async fn create_token(
        &self,
        token: &Token,
        policies: &[NewValidityPolicy],
    ) -> anyhow::Result<()>;

    /// Overwrite the token row and replace its whole policy set.
    /// Returns `false` when the token no longer exists.
    async fn update_token(
        &self,
        token: &Token,
        policies: &[NewValidityPolicy],
    ) -> anyhow::Result<bool>;

    /// Hard-delete the token and its policies. Returns `false` when absent.
    async fn delete_token(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Connectivity probe for `/readyz`.
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Raised by stores when a write would break a uniqueness constraint.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UniqueViolation(pub String);
