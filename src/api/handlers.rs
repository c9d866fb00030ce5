use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::config::EnvConf;
use crate::errors::AppError;
use crate::middleware::auth::UserInfo;
use crate::models::response::{DataResult, Page};
use crate::models::token::{
    CreateTokenRequest, ExportTokenRequest, ListTokensRequest, TokenAuthRequest, TokenView,
    UpdateTokenRequest,
};
use crate::AppState;

type ApiResult<T> = Result<Json<DataResult<T>>, AppError>;

/// Decode a JSON body; an empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Failed to bind body: {}", e)))
}

fn parse_token_id(raw: &str) -> Result<Uuid, AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::Validation("Token ID is required.".into()));
    }
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation("Token ID is invalid.".into()))
}

// ── Unauthenticated ──────────────────────────────────────────

/// GET /apis/auth.engine.io/ping
pub async fn ping(headers: HeaderMap) -> Json<serde_json::Value> {
    let mut res = json!({ "message": "pong" });
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        res["authorization"] = json!(auth);
    }
    Json(res)
}

/// POST /apis/auth.engine.io/token/auth
pub async fn token_auth(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<&'static str> {
    let req: TokenAuthRequest = parse_body(&body)?;
    state.tokens.authenticate(&req.token, Utc::now()).await?;
    Ok(Json(DataResult::ok("success")))
}

// ── Management ───────────────────────────────────────────────

/// GET /v1/envs
pub async fn list_envs(State(state): State<Arc<AppState>>) -> ApiResult<Vec<EnvConf>> {
    Ok(Json(DataResult::ok(state.config.envs.clone())))
}

/// POST /v1/workspaces/:workspaceId/tokens/list (current environment only)
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    body: Bytes,
) -> ApiResult<Page<TokenView>> {
    let req: ListTokensRequest = parse_body(&body)?;
    let page = state.tokens.list(&workspace_id, req, false).await?;
    Ok(Json(DataResult::ok(page)))
}

/// POST /v1/workspaces/:workspaceId/tokens/allEnv/list
pub async fn list_all_env_tokens(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    body: Bytes,
) -> ApiResult<Page<TokenView>> {
    let req: ListTokensRequest = parse_body(&body)?;
    let page = state.tokens.list(&workspace_id, req, true).await?;
    Ok(Json(DataResult::ok(page)))
}

/// POST /v1/workspaces/:workspaceId/tokens/add
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Extension(user): Extension<UserInfo>,
    body: Bytes,
) -> ApiResult<TokenView> {
    let req: CreateTokenRequest = parse_body(&body)?;
    let view = state
        .tokens
        .create(&workspace_id, req, &user, Utc::now())
        .await?;
    Ok(Json(DataResult::ok(view)))
}

/// GET /v1/workspaces/:workspaceId/tokens/:tokenId
pub async fn get_token(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, token_id)): Path<(String, String)>,
) -> ApiResult<TokenView> {
    let id = parse_token_id(&token_id)?;
    Ok(Json(DataResult::ok(
        state.tokens.get(&workspace_id, id).await?,
    )))
}

/// PUT /v1/workspaces/:workspaceId/tokens/:tokenId
pub async fn update_token(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, token_id)): Path<(String, String)>,
    Extension(user): Extension<UserInfo>,
    body: Bytes,
) -> ApiResult<TokenView> {
    let id = parse_token_id(&token_id)?;
    let req: UpdateTokenRequest = parse_body(&body)?;
    let view = state
        .tokens
        .update(&workspace_id, id, req, &user, Utc::now())
        .await?;
    Ok(Json(DataResult::ok(view)))
}

/// DELETE /v1/workspaces/:workspaceId/tokens/:tokenId
pub async fn delete_token(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, token_id)): Path<(String, String)>,
) -> ApiResult<&'static str> {
    let id = parse_token_id(&token_id)?;
    state.tokens.delete(&workspace_id, id).await?;
    Ok(Json(DataResult::ok("delete token success")))
}

/// POST /v1/workspaces/:workspaceId/tokens/:tokenId/export
///
/// Responds with the encrypted file as an attachment, not the JSON envelope.
pub async fn export_token(
    State(state): State<Arc<AppState>>,
    Path((workspace_id, token_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: ExportTokenRequest = parse_body(&body)?;
    if req.env_name.trim().is_empty() {
        return Err(AppError::Validation("EnvName is required.".into()));
    }
    let id = parse_token_id(&token_id)?;
    let file = state.tokens.export(&workspace_id, id, Utc::now()).await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename={}", file.filename))
        .map_err(|_| AppError::Validation("Token names cannot be used as a file name.".into()))?;
    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}

/// POST /v1/workspaces/:workspaceId/tokens/import (multipart, field `file`)
pub async fn import_token(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
    Extension(user): Extension<UserInfo>,
    mut multipart: Multipart,
) -> ApiResult<TokenView> {
    let max_bytes = state.config.max_import_bytes;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(AppError::Validation("file is required.".into()));
    };
    if filename.trim().is_empty() {
        return Err(AppError::Validation(
            "File name is empty, upload is not allowed.".into(),
        ));
    }
    if bytes.is_empty() {
        return Err(AppError::Validation(format!(
            "{} is empty, upload is not allowed.",
            filename
        )));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "{} is too large, only files up to {} bytes are allowed.",
            filename, max_bytes
        )));
    }
    let suffix = std::path::Path::new(&filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if suffix != "txt" {
        return Err(AppError::Validation(format!(
            "Unsupported file type: .{}",
            suffix
        )));
    }

    let view = state
        .tokens
        .import(&workspace_id, &bytes, &user, Utc::now())
        .await?;
    Ok(Json(DataResult::ok(view)))
}

/// GET /readyz
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.tokens.store().ping().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!("readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}
