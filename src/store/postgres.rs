use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{PolicyStore, TokenStore, UniqueViolation};
use crate::models::token::{OrderParam, PageParam, SortOrder, Token, TokenAuthInfo, TokenQuery};
use crate::models::validity::{
    NewValidityPolicy, PolicyType, ValidityError, ValidityPolicy, ValidityWindow,
};

/// Bind-parameter budget per INSERT is 65535; 9 columns per policy row.
const POLICY_BATCH_SIZE: usize = 1000;

const TOKEN_COLUMNS: &str = "id, workspace_id, token, expired_at, app_scenario_name, model_name, \
     env_name, max_concurrency, enable_validity_policy, policy_type, created_by, updated_by, \
     created_at, updated_at";

const POLICY_COLUMNS: &str =
    "id, token_id, workspace_id, policy_type, start_time, end_time, start_day, end_day, start_date, end_date";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// -- Row Mapping --

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    workspace_id: String,
    token: String,
    expired_at: Option<DateTime<Utc>>,
    app_scenario_name: String,
    model_name: String,
    env_name: String,
    max_concurrency: i32,
    enable_validity_policy: bool,
    policy_type: Option<String>,
    created_by: String,
    updated_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for Token {
    type Error = anyhow::Error;

    fn try_from(row: TokenRow) -> anyhow::Result<Self> {
        let policy_type = row
            .policy_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::parse::<PolicyType>)
            .transpose()
            .map_err(|e| anyhow::anyhow!("token {}: {}", row.id, e))?;
        Ok(Token {
            id: row.id,
            workspace_id: row.workspace_id,
            secret: row.token,
            expired_at: row.expired_at,
            app_scenario_name: row.app_scenario_name,
            model_name: row.model_name,
            env_name: row.env_name,
            max_concurrency: row.max_concurrency,
            enable_validity_policy: row.enable_validity_policy,
            policy_type,
            created_by: row.created_by,
            updated_by: row.updated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    id: i64,
    token_id: Uuid,
    workspace_id: String,
    policy_type: String,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    start_day: Option<String>,
    end_day: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl TryFrom<PolicyRow> for ValidityPolicy {
    type Error = anyhow::Error;

    fn try_from(row: PolicyRow) -> anyhow::Result<Self> {
        let corrupt = |e: ValidityError| anyhow::anyhow!("validity policy {}: {}", row.id, e);
        let policy_type: PolicyType = row.policy_type.parse().map_err(corrupt)?;
        let window = ValidityWindow::from_columns(
            policy_type,
            row.start_time,
            row.end_time,
            row.start_day.as_deref(),
            row.end_day.as_deref(),
            row.start_date,
            row.end_date,
        )
        .map_err(corrupt)?;
        Ok(ValidityPolicy {
            id: row.id,
            token_id: row.token_id,
            workspace_id: row.workspace_id,
            window,
        })
    }
}

fn map_write_error(e: sqlx::Error) -> anyhow::Error {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => UniqueViolation(db.message().to_string()).into(),
        _ => e.into(),
    }
}

/// `LIKE` pattern matching `value` as a literal substring.
fn like_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_token_filters<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    workspace_id: &'a str,
    query: &'a TokenQuery,
) {
    qb.push(" WHERE workspace_id = ").push_bind(workspace_id);
    if let Some(scenario) = query.app_scenario_name.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND app_scenario_name LIKE ")
            .push_bind(like_pattern(scenario));
    }
    if let Some(model) = query.model_name.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND model_name LIKE ").push_bind(like_pattern(model));
    }
    if let Some(env) = query.env_name.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND env_name = ").push_bind(env);
    }
}

// -- Transaction Helpers --

async fn insert_policies(
    conn: &mut PgConnection,
    policies: &[NewValidityPolicy],
) -> anyhow::Result<()> {
    for chunk in policies.chunks(POLICY_BATCH_SIZE) {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO token_validity_policies \
             (token_id, workspace_id, policy_type, start_time, end_time, start_day, end_day, start_date, end_date) ",
        );
        qb.push_values(chunk, |mut row, p| {
            let cols = p.window.columns();
            row.push_bind(p.token_id)
                .push_bind(p.workspace_id.clone())
                .push_bind(p.window.policy_type().as_str())
                .push_bind(cols.start_time)
                .push_bind(cols.end_time)
                .push_bind(cols.start_day)
                .push_bind(cols.end_day)
                .push_bind(cols.start_date)
                .push_bind(cols.end_date);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn delete_policies(conn: &mut PgConnection, token_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM token_validity_policies WHERE token_id = $1")
        .bind(token_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

async fn select_policies(
    conn: &mut PgConnection,
    token_id: Uuid,
    policy_type: Option<PolicyType>,
) -> anyhow::Result<Vec<ValidityPolicy>> {
    let rows = sqlx::query_as::<_, PolicyRow>(&format!(
        "SELECT {POLICY_COLUMNS} FROM token_validity_policies \
         WHERE token_id = $1 AND ($2::VARCHAR IS NULL OR policy_type = $2) \
         ORDER BY id ASC"
    ))
    .bind(token_id)
    .bind(policy_type.map(|t| t.as_str()))
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(ValidityPolicy::try_from).collect()
}

// -- Policy Operations --

#[async_trait]
impl PolicyStore for PgStore {
    async fn list_by_token(
        &self,
        token_id: Uuid,
        policy_type: Option<PolicyType>,
    ) -> anyhow::Result<Vec<ValidityPolicy>> {
        let mut conn = self.pool.acquire().await?;
        select_policies(&mut conn, token_id, policy_type).await
    }

    async fn batch_create(&self, policies: &[NewValidityPolicy]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_policies(&mut tx, policies).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_token(&self, token_id: Uuid) -> anyhow::Result<u64> {
        let mut conn = self.pool.acquire().await?;
        delete_policies(&mut conn, token_id).await
    }
}

// -- Token Operations --

#[async_trait]
impl TokenStore for PgStore {
    async fn get_auth_info(
        &self,
        secret: &str,
        env_name: &str,
    ) -> anyhow::Result<Option<TokenAuthInfo>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE token = $1 AND env_name = $2"
        ))
        .bind(secret)
        .bind(env_name)
        .fetch_optional(&mut *conn)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let token = Token::try_from(row)?;
        let windows = select_policies(&mut conn, token.id, None)
            .await?
            .into_iter()
            .map(|p| p.window)
            .collect();
        Ok(Some(TokenAuthInfo { token, windows }))
    }

    async fn query_page(
        &self,
        workspace_id: &str,
        query: &TokenQuery,
        page: PageParam,
        order: &OrderParam,
    ) -> anyhow::Result<(i64, Vec<Token>)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM tokens");
        push_token_filters(&mut count_qb, workspace_id, query);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::new(format!("SELECT {TOKEN_COLUMNS} FROM tokens"));
        push_token_filters(&mut qb, workspace_id, query);
        qb.push(match order.created_order() {
            SortOrder::Asc => " ORDER BY created_at ASC, id ASC",
            SortOrder::Desc => " ORDER BY created_at DESC, id DESC",
        });
        let (offset, limit) = page.window();
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit);
            qb.push(" OFFSET ").push_bind(offset);
        }
        let rows = qb
            .build_query_as::<TokenRow>()
            .fetch_all(&self.pool)
            .await?;
        let tokens = rows
            .into_iter()
            .map(Token::try_from)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((total, tokens))
    }

    async fn token_exists(
        &self,
        workspace_id: &str,
        app_scenario_name: &str,
        model_name: &str,
        env_name: &str,
        exclude: Option<Uuid>,
    ) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM tokens \
             WHERE workspace_id = $1 AND app_scenario_name = $2 AND model_name = $3 \
             AND env_name = $4 AND ($5::UUID IS NULL OR id <> $5))",
        )
        .bind(workspace_id)
        .bind(app_scenario_name)
        .bind(model_name)
        .bind(env_name)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn get_token(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Token::try_from).transpose()
    }

    async fn create_token(
        &self,
        token: &Token,
        policies: &[NewValidityPolicy],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO tokens ({TOKEN_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(token.id)
        .bind(&token.workspace_id)
        .bind(&token.secret)
        .bind(token.expired_at)
        .bind(&token.app_scenario_name)
        .bind(&token.model_name)
        .bind(&token.env_name)
        .bind(token.max_concurrency)
        .bind(token.enable_validity_policy)
        .bind(token.policy_type.map(|t| t.as_str()))
        .bind(&token.created_by)
        .bind(&token.updated_by)
        .bind(token.created_at)
        .bind(token.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;
        insert_policies(&mut tx, policies).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_token(
        &self,
        token: &Token,
        policies: &[NewValidityPolicy],
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE tokens SET expired_at = $2, app_scenario_name = $3, model_name = $4, \
             env_name = $5, max_concurrency = $6, enable_validity_policy = $7, policy_type = $8, \
             updated_by = $9, updated_at = $10 \
             WHERE id = $1",
        )
        .bind(token.id)
        .bind(token.expired_at)
        .bind(&token.app_scenario_name)
        .bind(&token.model_name)
        .bind(&token.env_name)
        .bind(token.max_concurrency)
        .bind(token.enable_validity_policy)
        .bind(token.policy_type.map(|t| t.as_str()))
        .bind(&token.updated_by)
        .bind(token.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        delete_policies(&mut tx, token.id).await?;
        insert_policies(&mut tx, policies).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_token(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        delete_policies(&mut tx, id).await?;
        let result = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
