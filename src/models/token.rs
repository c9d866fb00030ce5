use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::validity::{PolicyType, ValidityPolicyPayload, ValidityWindow};

/// `YYYY-MM-DD HH:MM:SS`, interpreted in the configured time zone.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_local(ts: DateTime<Utc>, tz: FixedOffset) -> String {
    ts.with_timezone(&tz).format(DATETIME_FORMAT).to_string()
}

pub fn parse_local(s: &str, tz: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .single()
        .map(|ts| ts.with_timezone(&Utc))
}

// ── Token ────────────────────────────────────────────────────

/// One issued credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Time-sortable (UUIDv7).
    pub id: Uuid,
    pub workspace_id: String,
    pub secret: String,
    pub expired_at: Option<DateTime<Utc>>,
    pub app_scenario_name: String,
    pub model_name: String,
    pub env_name: String,
    /// Informational only; nothing enforces it.
    pub max_concurrency: i32,
    pub enable_validity_policy: bool,
    pub policy_type: Option<PolicyType>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.is_some_and(|exp| now > exp)
    }
}

/// Everything needed to decide whether a secret may be used right now:
/// the token row joined with its validity windows.
#[derive(Debug, Clone)]
pub struct TokenAuthInfo {
    pub token: Token,
    pub windows: Vec<ValidityWindow>,
}

// ── Listing ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenQuery {
    pub app_scenario_name: Option<String>,
    pub model_name: Option<String>,
    pub env_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageParam {
    pub page_num: i64,
    /// `-1` returns every record.
    pub page_size: i64,
}

impl Default for PageParam {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 1000;
pub const MAX_PAGE_NUM: i64 = 1_000_000;

impl PageParam {
    /// Fill zero / negative values the way the list endpoints expect and
    /// clamp the rest so offsets stay far from `i64` overflow.
    pub fn normalized(self) -> Self {
        Self {
            page_num: self.page_num.clamp(1, MAX_PAGE_NUM),
            page_size: match self.page_size {
                0 => DEFAULT_PAGE_SIZE,
                n if n < -1 => DEFAULT_PAGE_SIZE,
                n => n.min(MAX_PAGE_SIZE),
            },
        }
    }

    /// `(offset, limit)`; `None` means no limit.
    pub fn window(&self) -> (i64, Option<i64>) {
        if self.page_size == -1 {
            return (0, None);
        }
        let offset = self
            .page_num
            .saturating_sub(1)
            .max(0)
            .saturating_mul(self.page_size);
        (offset, Some(self.page_size))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderParam {
    /// Only `createTime` is sortable; anything else falls back to newest first.
    pub column: Option<String>,
    pub order: Option<SortOrder>,
}

impl OrderParam {
    pub fn created_order(&self) -> SortOrder {
        match self.column.as_deref() {
            Some("createTime") => self.order.unwrap_or_default(),
            _ => SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTokensRequest {
    pub page_param: PageParam,
    pub order_param: OrderParam,
    pub query_param: TokenQuery,
}

// ── Requests ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTokenRequest {
    pub expired_time: Option<String>,
    pub app_scenario_name: String,
    pub model_name: String,
    pub env_name: Option<String>,
    pub max_concurrency: i32,
    pub enable_validity_policy: bool,
    pub policy_type: Option<String>,
    pub validity_policy: Vec<ValidityPolicyPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateTokenRequest {
    pub expired_time: Option<String>,
    pub app_scenario_name: String,
    pub model_name: String,
    pub max_concurrency: i32,
    pub enable_validity_policy: bool,
    pub policy_type: Option<String>,
    pub validity_policy: Vec<ValidityPolicyPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenAuthRequest {
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportTokenRequest {
    pub workspace_id: Option<String>,
    pub env_name: String,
    pub env_alias: Option<String>,
}

// ── Responses ────────────────────────────────────────────────

/// Token as shown to API callers and written into export files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenView {
    pub id: String,
    pub workspace_id: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_time: Option<String>,
    pub app_scenario_name: String,
    pub model_name: String,
    pub env_name: String,
    pub env_alias: String,
    pub max_concurrency: i32,
    pub enable_validity_policy: bool,
    pub policy_type: Option<String>,
    pub create_by: String,
    pub update_by: String,
    pub create_time: String,
    pub update_time: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validity_policy: Vec<ValidityPolicyPayload>,
}

impl TokenView {
    pub fn new(token: &Token, env_alias: &str, tz: FixedOffset) -> Self {
        Self {
            id: token.id.to_string(),
            workspace_id: token.workspace_id.clone(),
            token: token.secret.clone(),
            expired_time: token.expired_at.map(|ts| format_local(ts, tz)),
            app_scenario_name: token.app_scenario_name.clone(),
            model_name: token.model_name.clone(),
            env_name: token.env_name.clone(),
            env_alias: env_alias.to_string(),
            max_concurrency: token.max_concurrency,
            enable_validity_policy: token.enable_validity_policy,
            policy_type: token.policy_type.map(|t| t.to_string()),
            create_by: token.created_by.clone(),
            update_by: token.updated_by.clone(),
            create_time: format_local(token.created_at, tz),
            update_time: format_local(token.updated_at, tz),
            validity_policy: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_local_datetime_round_trip() {
        let ts = parse_local("2025-01-15 09:30:00", cst()).unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-01-15T01:30:00+00:00");
        assert_eq!(format_local(ts, cst()), "2025-01-15 09:30:00");
        assert!(parse_local("2025-01-15T09:30:00", cst()).is_none());
    }

    #[test]
    fn test_page_param_normalization() {
        let p = PageParam {
            page_num: 0,
            page_size: 0,
        }
        .normalized();
        assert_eq!((p.page_num, p.page_size), (1, 10));
        assert_eq!(p.window(), (0, Some(10)));

        let p = PageParam {
            page_num: 3,
            page_size: 20,
        }
        .normalized();
        assert_eq!(p.window(), (40, Some(20)));

        let all = PageParam {
            page_num: 5,
            page_size: -1,
        }
        .normalized();
        assert_eq!(all.window(), (0, None));
    }

    #[test]
    fn test_page_param_clamps_huge_values() {
        let p = PageParam {
            page_num: i64::MAX,
            page_size: i64::MAX,
        }
        .normalized();
        assert_eq!((p.page_num, p.page_size), (MAX_PAGE_NUM, MAX_PAGE_SIZE));
        assert_eq!(
            p.window(),
            ((MAX_PAGE_NUM - 1) * MAX_PAGE_SIZE, Some(MAX_PAGE_SIZE))
        );

        let raw = PageParam {
            page_num: i64::MAX,
            page_size: 10,
        };
        assert_eq!(raw.window().0, i64::MAX);
    }

    #[test]
    fn test_order_param_only_sorts_on_create_time() {
        let asc: OrderParam =
            serde_json::from_value(serde_json::json!({"column": "createTime", "order": "asc"}))
                .unwrap();
        assert_eq!(asc.created_order(), SortOrder::Asc);

        let other: OrderParam =
            serde_json::from_value(serde_json::json!({"column": "token", "order": "asc"}))
                .unwrap();
        assert_eq!(other.created_order(), SortOrder::Desc);
    }

    #[test]
    fn test_create_request_accepts_camel_case_body() {
        let req: CreateTokenRequest = serde_json::from_value(serde_json::json!({
            "appScenarioName": "chat",
            "modelName": "qwen-72b",
            "maxConcurrency": 4,
            "enableValidityPolicy": true,
            "policyType": "DAILY",
            "validityPolicy": [{"startTime": "09:00:00", "endTime": "18:00:00"}]
        }))
        .unwrap();
        assert_eq!(req.app_scenario_name, "chat");
        assert_eq!(req.max_concurrency, 4);
        assert!(req.env_name.is_none());
        assert_eq!(req.validity_policy.len(), 1);
        assert_eq!(
            req.validity_policy[0].start_time.as_deref(),
            Some("09:00:00")
        );
    }

    #[test]
    fn test_expiry_is_strict() {
        let exp = parse_local("2025-01-01 00:00:00", cst()).unwrap();
        let token = Token {
            id: Uuid::now_v7(),
            workspace_id: "ws".into(),
            secret: "sk-x".into(),
            expired_at: Some(exp),
            app_scenario_name: "a".into(),
            model_name: "m".into(),
            env_name: "test".into(),
            max_concurrency: 0,
            enable_validity_policy: false,
            policy_type: None,
            created_by: String::new(),
            updated_by: String::new(),
            created_at: exp,
            updated_at: exp,
        };
        assert!(!token.is_expired_at(exp));
        assert!(token.is_expired_at(exp + chrono::Duration::seconds(1)));
    }
}
