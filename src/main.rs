use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth_engine::cli::{self, Commands, TokenCommands};
use auth_engine::models::token::ListTokensRequest;
use auth_engine::service::TokenService;
use auth_engine::store::postgres::PgStore;
use auth_engine::{api, config, open_store, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load()?;
    init_tracing(&cfg)?;

    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Migrate) => run_migrations(&cfg).await,
        Some(Commands::Token { command }) => {
            let store = open_store(&cfg.database_url, false).await?;
            let state = AppState::new(store, cfg)?;
            handle_token_command(command, &state).await
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

/// `RUST_LOG` wins over `AUTH_ENGINE_LOG_LEVEL`. Spans are exported over
/// OTLP when a tracer endpoint is configured.
fn init_tracing(cfg: &config::Config) -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = match cfg.tracer_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "auth-engine"),
                ])))
                .install_batch(opentelemetry_sdk::runtime::Tokio)
                .context("failed to install OpenTelemetry tracer")?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cfg.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let store = open_store(&cfg.database_url, true).await?;

    tracing::info!(
        env = %cfg.current_env.name,
        timezone = %cfg.timezone,
        policy_types = ?cfg.policy_types,
        "Initializing token service..."
    );
    let state = Arc::new(AppState::new(store, cfg)?);
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("auth-engine listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn run_migrations(cfg: &config::Config) -> anyhow::Result<()> {
    if cfg.database_url.starts_with("memory://") {
        println!("In-memory store configured; nothing to migrate.");
        return Ok(());
    }
    let db = PgStore::connect(&cfg.database_url).await?;
    db.migrate().await?;
    println!("Migrations applied.");
    Ok(())
}

async fn handle_token_command(cmd: TokenCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Generate => {
            println!("{}", TokenService::generate_secret()?);
        }
        TokenCommands::List {
            workspace,
            all_envs,
        } => {
            let req = ListTokensRequest::default();
            let page = state
                .tokens
                .list(&workspace, req, all_envs)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            if page.records.is_empty() {
                println!("No tokens found.");
            } else {
                println!(
                    "{:<38} {:<20} {:<20} {:<10} {:<10}",
                    "ID", "SCENARIO", "MODEL", "ENV", "POLICY"
                );
                for t in page.records {
                    println!(
                        "{:<38} {:<20} {:<20} {:<10} {:<10}",
                        t.id,
                        t.app_scenario_name,
                        t.model_name,
                        t.env_name,
                        t.policy_type.as_deref().unwrap_or("-")
                    );
                }
                println!("{} of {} shown.", page.size.min(page.total), page.total);
            }
        }
        TokenCommands::Check { token } => {
            match state.tokens.authenticate(&token, chrono::Utc::now()).await {
                Ok(()) => println!("Token is valid."),
                Err(e) => println!("Token rejected: {}", e),
            }
        }
        TokenCommands::Delete {
            workspace,
            token_id,
        } => {
            let id = uuid::Uuid::parse_str(&token_id).context("Invalid token_id")?;
            match state.tokens.delete(&workspace, id).await {
                Ok(()) => println!("Token deleted."),
                Err(auth_engine::errors::AppError::NotFound(_)) => println!("Token not found."),
                Err(e) => return Err(anyhow::anyhow!("{}", e)),
            }
        }
    }
    Ok(())
}
