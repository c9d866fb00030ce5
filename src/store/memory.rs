use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PolicyStore, TokenStore, UniqueViolation};
use crate::models::token::{OrderParam, PageParam, SortOrder, Token, TokenAuthInfo, TokenQuery};
use crate::models::validity::{NewValidityPolicy, PolicyType, ValidityPolicy};

/// In-process store behind a single lock. Selected with a `memory://`
/// database URL; state is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tokens: BTreeMap<Uuid, Token>,
    policies: Vec<ValidityPolicy>,
    next_policy_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn insert_policies(&mut self, policies: &[NewValidityPolicy]) {
        for p in policies {
            self.next_policy_id += 1;
            self.policies.push(ValidityPolicy {
                id: self.next_policy_id,
                token_id: p.token_id,
                workspace_id: p.workspace_id.clone(),
                window: p.window.clone(),
            });
        }
    }

    fn remove_policies(&mut self, token_id: Uuid) -> u64 {
        let before = self.policies.len();
        self.policies.retain(|p| p.token_id != token_id);
        (before - self.policies.len()) as u64
    }

    /// Same constraints the SQL schema enforces.
    fn check_unique(&self, token: &Token) -> Result<(), UniqueViolation> {
        for other in self.tokens.values().filter(|t| t.id != token.id) {
            if other.secret == token.secret {
                return Err(UniqueViolation("token secret already exists".into()));
            }
            if other.workspace_id == token.workspace_id
                && other.app_scenario_name == token.app_scenario_name
                && other.model_name == token.model_name
                && other.env_name == token.env_name
            {
                return Err(UniqueViolation(
                    "appScenarioName, modelName and envName already exists".into(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn list_by_token(
        &self,
        token_id: Uuid,
        policy_type: Option<PolicyType>,
    ) -> anyhow::Result<Vec<ValidityPolicy>> {
        let inner = self.inner.read().await;
        Ok(inner
            .policies
            .iter()
            .filter(|p| p.token_id == token_id)
            .filter(|p| policy_type.map_or(true, |t| p.policy_type() == t))
            .cloned()
            .collect())
    }

    async fn batch_create(&self, policies: &[NewValidityPolicy]) -> anyhow::Result<()> {
        self.inner.write().await.insert_policies(policies);
        Ok(())
    }

    async fn delete_by_token(&self, token_id: Uuid) -> anyhow::Result<u64> {
        Ok(self.inner.write().await.remove_policies(token_id))
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn get_auth_info(
        &self,
        secret: &str,
        env_name: &str,
    ) -> anyhow::Result<Option<TokenAuthInfo>> {
        let inner = self.inner.read().await;
        let Some(token) = inner
            .tokens
            .values()
            .find(|t| t.secret == secret && t.env_name == env_name)
        else {
            return Ok(None);
        };
        let windows = inner
            .policies
            .iter()
            .filter(|p| p.token_id == token.id)
            .map(|p| p.window.clone())
            .collect();
        Ok(Some(TokenAuthInfo {
            token: token.clone(),
            windows,
        }))
    }

    async fn query_page(
        &self,
        workspace_id: &str,
        query: &TokenQuery,
        page: PageParam,
        order: &OrderParam,
    ) -> anyhow::Result<(i64, Vec<Token>)> {
        let inner = self.inner.read().await;
        let contains = |value: &str, filter: &Option<String>| {
            filter
                .as_deref()
                .filter(|f| !f.is_empty())
                .map_or(true, |f| value.contains(f))
        };
        let mut matched: Vec<Token> = inner
            .tokens
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .filter(|t| contains(&t.app_scenario_name, &query.app_scenario_name))
            .filter(|t| contains(&t.model_name, &query.model_name))
            .filter(|t| {
                query
                    .env_name
                    .as_deref()
                    .filter(|e| !e.is_empty())
                    .map_or(true, |e| t.env_name == e)
            })
            .cloned()
            .collect();

        matched.sort_by_key(|t| (t.created_at, t.id));
        if order.created_order() == SortOrder::Desc {
            matched.reverse();
        }

        let total = matched.len() as i64;
        let (offset, limit) = page.window();
        let records = matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.map_or(usize::MAX, |l| l.max(0) as usize))
            .collect();
        Ok((total, records))
    }

    async fn token_exists(
        &self,
        workspace_id: &str,
        app_scenario_name: &str,
        model_name: &str,
        env_name: &str,
        exclude: Option<Uuid>,
    ) -> anyhow::Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.tokens.values().any(|t| {
            Some(t.id) != exclude
                && t.workspace_id == workspace_id
                && t.app_scenario_name == app_scenario_name
                && t.model_name == model_name
                && t.env_name == env_name
        }))
    }

    async fn get_token(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        Ok(self.inner.read().await.tokens.get(&id).cloned())
    }

    async fn create_token(
        &self,
        token: &Token,
        policies: &[NewValidityPolicy],
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        if inner.tokens.contains_key(&token.id) {
            return Err(UniqueViolation("token id already exists".into()).into());
        }
        inner.check_unique(token)?;
        inner.tokens.insert(token.id, token.clone());
        inner.insert_policies(policies);
        Ok(())
    }

    async fn update_token(
        &self,
        token: &Token,
        policies: &[NewValidityPolicy],
    ) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.tokens.contains_key(&token.id) {
            return Ok(false);
        }
        inner.check_unique(token)?;
        inner.tokens.insert(token.id, token.clone());
        inner.remove_policies(token.id);
        inner.insert_policies(policies);
        Ok(true)
    }

    async fn delete_token(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.tokens.remove(&id).is_none() {
            return Ok(false);
        }
        inner.remove_policies(id);
        Ok(true)
    }
}
