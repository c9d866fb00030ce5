//! Token lifecycle: request validation, secret issuance, authentication and
//! encrypted export / import, on top of a [`TokenStore`].

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::middleware::auth::UserInfo;
use crate::middleware::validity::{self, check_validity_policy, Denial};
use crate::models::response::Page;
use crate::models::token::{
    parse_local, CreateTokenRequest, ListTokensRequest, Token, TokenView, UpdateTokenRequest,
};
use crate::models::validity::{
    NewValidityPolicy, PolicyType, ValidityError, ValidityPolicyPayload, ValidityWindow,
};
use crate::store::TokenStore;
use crate::vault::FileCipher;

pub const SECRET_PREFIX: &str = "sk-";
const SECRET_BYTES: usize = 32;

/// An encrypted token file ready to be sent as an attachment.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

pub struct TokenService {
    store: Arc<dyn TokenStore>,
    cipher: FileCipher,
    config: Config,
}

/// Fields shared by create, update and import once they are validated.
struct CheckedToken {
    expired_at: Option<DateTime<Utc>>,
    policy_type: Option<PolicyType>,
    windows: Vec<ValidityWindow>,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, config: Config) -> anyhow::Result<Self> {
        let cipher = FileCipher::new(&config.file_key)?;
        Ok(Self {
            store,
            cipher,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// `sk-` followed by 32 CSPRNG bytes, URL-safe base64 without padding.
    pub fn generate_secret() -> anyhow::Result<String> {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| anyhow::anyhow!("OS random source failed: {}", e))?;
        Ok(format!("{}{}", SECRET_PREFIX, URL_SAFE_NO_PAD.encode(bytes)))
    }

    // ── Authentication ───────────────────────────────────────

    /// Decide whether `secret` may be used at `now` in the current environment.
    pub async fn authenticate(&self, secret: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let secret = secret.trim();
        if secret.is_empty() {
            tracing::warn!("token auth: empty token");
            return Err(AppError::Unauthorized("Token is empty.".into()));
        }

        let Some(info) = self
            .store
            .get_auth_info(secret, &self.config.current_env.name)
            .await?
        else {
            tracing::warn!(token = %mask(secret), "token auth: no token found");
            return Err(AppError::TokenNotFound);
        };

        match validity::evaluate(now, self.config.timezone, &info) {
            Ok(()) => {
                tracing::info!(token_id = %info.token.id, "token auth success");
                Ok(())
            }
            Err(Denial::Expired) => {
                tracing::warn!(token_id = %info.token.id, "token auth: expired");
                Err(AppError::TokenExpired)
            }
            Err(Denial::OutsideValidityWindow) => {
                tracing::warn!(token_id = %info.token.id, "token auth: no policy pass");
                Err(AppError::PolicyRejected)
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────

    /// Page of a workspace's tokens. Unless `all_envs` is set, only tokens of
    /// the current environment are listed.
    pub async fn list(
        &self,
        workspace_id: &str,
        mut req: ListTokensRequest,
        all_envs: bool,
    ) -> Result<Page<TokenView>, AppError> {
        if !all_envs {
            req.query_param.env_name = Some(self.config.current_env.name.clone());
        }
        let page = req.page_param.normalized();
        let (total, tokens) = self
            .store
            .query_page(workspace_id, &req.query_param, page, &req.order_param)
            .await?;
        let records = tokens.iter().map(|t| self.view(t)).collect();
        Ok(Page::new(records, total, page))
    }

    /// Token detail; includes its policies when validity is enabled.
    pub async fn get(&self, workspace_id: &str, id: Uuid) -> Result<TokenView, AppError> {
        let token = self.find(workspace_id, id).await?;
        let mut view = self.view(&token);
        if token.enable_validity_policy {
            view.validity_policy = self
                .store
                .list_by_token(token.id, token.policy_type)
                .await?
                .iter()
                .map(ValidityPolicyPayload::from)
                .collect();
        }
        Ok(view)
    }

    // ── Writes ───────────────────────────────────────────────

    pub async fn create(
        &self,
        workspace_id: &str,
        req: CreateTokenRequest,
        user: &UserInfo,
        now: DateTime<Utc>,
    ) -> Result<TokenView, AppError> {
        self.create_with_secret(workspace_id, req, None, user, now)
            .await
    }

    async fn create_with_secret(
        &self,
        workspace_id: &str,
        req: CreateTokenRequest,
        secret: Option<String>,
        user: &UserInfo,
        now: DateTime<Utc>,
    ) -> Result<TokenView, AppError> {
        require_names(&req.app_scenario_name, &req.model_name)?;
        if workspace_id.trim().is_empty() {
            return Err(AppError::Validation("Workspace ID is required.".into()));
        }
        let checked = self.check_token_fields(
            req.expired_time.as_deref(),
            req.enable_validity_policy,
            req.policy_type.as_deref(),
            &req.validity_policy,
            now,
        )?;
        let env_name = req
            .env_name
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| self.config.current_env.name.clone());

        self.ensure_unique(
            workspace_id,
            &req.app_scenario_name,
            &req.model_name,
            &env_name,
            None,
        )
        .await?;

        let secret = match secret {
            Some(secret) => secret,
            None => Self::generate_secret().map_err(AppError::Internal)?,
        };
        let operator = operator_name(user);
        let token = Token {
            id: Uuid::now_v7(),
            workspace_id: workspace_id.to_string(),
            secret,
            expired_at: checked.expired_at,
            app_scenario_name: req.app_scenario_name,
            model_name: req.model_name,
            env_name,
            max_concurrency: req.max_concurrency,
            enable_validity_policy: req.enable_validity_policy,
            policy_type: checked.policy_type,
            created_by: operator.clone(),
            updated_by: operator,
            created_at: now,
            updated_at: now,
        };
        let policies = new_policies(&token, checked.windows);
        self.store.create_token(&token, &policies).await?;
        tracing::info!(
            token_id = %token.id,
            workspace_id = %token.workspace_id,
            policies = policies.len(),
            "token created"
        );
        self.get(workspace_id, token.id).await
    }

    /// Overwrite a token's settings. The environment never changes and the
    /// policy set is replaced wholesale.
    pub async fn update(
        &self,
        workspace_id: &str,
        id: Uuid,
        req: UpdateTokenRequest,
        user: &UserInfo,
        now: DateTime<Utc>,
    ) -> Result<TokenView, AppError> {
        require_names(&req.app_scenario_name, &req.model_name)?;
        let checked = self.check_token_fields(
            req.expired_time.as_deref(),
            req.enable_validity_policy,
            req.policy_type.as_deref(),
            &req.validity_policy,
            now,
        )?;
        let existing = self.find(workspace_id, id).await?;
        self.ensure_unique(
            workspace_id,
            &req.app_scenario_name,
            &req.model_name,
            &existing.env_name,
            Some(id),
        )
        .await?;

        let token = Token {
            expired_at: checked.expired_at,
            app_scenario_name: req.app_scenario_name,
            model_name: req.model_name,
            max_concurrency: req.max_concurrency,
            enable_validity_policy: req.enable_validity_policy,
            policy_type: checked.policy_type,
            updated_by: operator_name(user),
            updated_at: now,
            ..existing
        };
        let policies = new_policies(&token, checked.windows);
        if !self.store.update_token(&token, &policies).await? {
            return Err(not_found());
        }
        tracing::info!(token_id = %id, policies = policies.len(), "token updated");
        self.get(workspace_id, id).await
    }

    pub async fn delete(&self, workspace_id: &str, id: Uuid) -> Result<(), AppError> {
        self.find(workspace_id, id).await?;
        if !self.store.delete_token(id).await? {
            return Err(not_found());
        }
        tracing::info!(token_id = %id, "token deleted");
        Ok(())
    }

    // ── Export / Import ──────────────────────────────────────

    /// Encrypted JSON of the token detail, named
    /// `<date>-<scenario>-<model>-<env>.txt`.
    pub async fn export(
        &self,
        workspace_id: &str,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExportedFile, AppError> {
        let view = self.get(workspace_id, id).await?;
        let json = serde_json::to_vec(&view)
            .map_err(|e| anyhow::anyhow!("failed to serialize token: {}", e))?;
        let bytes = self.cipher.encrypt(&json)?;
        let filename = format!(
            "{}-{}-{}-{}.txt",
            now.with_timezone(&self.config.timezone).format("%Y-%m-%d"),
            view.app_scenario_name,
            view.model_name,
            view.env_name
        );
        tracing::info!(token_id = %id, filename = %filename, "token exported");
        Ok(ExportedFile { filename, bytes })
    }

    /// Re-create an exported token in `workspace_id`, keeping its secret.
    pub async fn import(
        &self,
        workspace_id: &str,
        file: &[u8],
        user: &UserInfo,
        now: DateTime<Utc>,
    ) -> Result<TokenView, AppError> {
        let plain = self.cipher.decrypt(file).map_err(|e| {
            tracing::warn!(error = %e, "token import: decrypt failed");
            AppError::Validation("Token file is invalid.".into())
        })?;
        let view: TokenView = serde_json::from_slice(&plain)
            .map_err(|_| AppError::Validation("Token file is invalid.".into()))?;

        if view.env_name != self.config.current_env.name {
            return Err(AppError::Validation("Env Name is not match.".into()));
        }
        let secret = Some(view.token).filter(|s| !s.trim().is_empty());
        let req = CreateTokenRequest {
            expired_time: view.expired_time,
            app_scenario_name: view.app_scenario_name,
            model_name: view.model_name,
            env_name: Some(view.env_name),
            max_concurrency: view.max_concurrency,
            enable_validity_policy: view.enable_validity_policy,
            policy_type: view.policy_type,
            validity_policy: view.validity_policy,
        };
        self.create_with_secret(workspace_id, req, secret, user, now)
            .await
    }

    // ── Helpers ──────────────────────────────────────────────

    fn view(&self, token: &Token) -> TokenView {
        TokenView::new(
            token,
            self.config.env_alias(&token.env_name),
            self.config.timezone,
        )
    }

    async fn find(&self, workspace_id: &str, id: Uuid) -> Result<Token, AppError> {
        match self.store.get_token(id).await? {
            Some(token) if token.workspace_id == workspace_id => Ok(token),
            _ => Err(not_found()),
        }
    }

    async fn ensure_unique(
        &self,
        workspace_id: &str,
        app_scenario_name: &str,
        model_name: &str,
        env_name: &str,
        exclude: Option<Uuid>,
    ) -> Result<(), AppError> {
        let exists = self
            .store
            .token_exists(workspace_id, app_scenario_name, model_name, env_name, exclude)
            .await?;
        if exists {
            return Err(AppError::Conflict(
                "Token with appScenarioName and modelName already exists.".into(),
            ));
        }
        Ok(())
    }

    fn check_token_fields(
        &self,
        expired_time: Option<&str>,
        enable_validity_policy: bool,
        policy_type: Option<&str>,
        policies: &[ValidityPolicyPayload],
        now: DateTime<Utc>,
    ) -> Result<CheckedToken, AppError> {
        let expired_at = match expired_time.map(str::trim).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => {
                let ts = parse_local(raw, self.config.timezone)
                    .ok_or_else(|| AppError::Validation("ExpiredTime is invalid.".into()))?;
                if ts < now {
                    return Err(AppError::Validation("ExpiredTime is before now.".into()));
                }
                Some(ts)
            }
        };

        if !enable_validity_policy {
            return Ok(CheckedToken {
                expired_at,
                policy_type: None,
                windows: Vec::new(),
            });
        }

        let name = policy_type.map(str::trim).filter(|s| !s.is_empty());
        let Some(name) = name.filter(|_| !policies.is_empty()) else {
            return Err(AppError::Validation(
                "policyType and validityPolicy is required.".into(),
            ));
        };
        let policy_type: PolicyType = name.parse()?;
        if !self.config.policy_types.contains(&policy_type) {
            return Err(ValidityError::InvalidPolicyType.into());
        }
        let windows = check_validity_policy(policy_type, policies)?;
        Ok(CheckedToken {
            expired_at,
            policy_type: Some(policy_type),
            windows,
        })
    }
}

fn require_names(app_scenario_name: &str, model_name: &str) -> Result<(), AppError> {
    if app_scenario_name.trim().is_empty() {
        return Err(AppError::Validation("App Scenario Name is required.".into()));
    }
    if model_name.trim().is_empty() {
        return Err(AppError::Validation("Model Name is required.".into()));
    }
    Ok(())
}

fn new_policies(token: &Token, windows: Vec<ValidityWindow>) -> Vec<NewValidityPolicy> {
    windows
        .into_iter()
        .map(|window| NewValidityPolicy {
            token_id: token.id,
            workspace_id: token.workspace_id.clone(),
            window,
        })
        .collect()
}

fn operator_name(user: &UserInfo) -> String {
    if user.username.is_empty() {
        user.id.clone()
    } else {
        user.username.clone()
    }
}

fn not_found() -> AppError {
    AppError::NotFound("Token not found.".into())
}

/// First and last four characters only.
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    } else {
        "****".to_string()
    }
}
