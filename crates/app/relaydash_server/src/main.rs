//! Relaydash API server binary.

use clap::Parser;
use relaydash_api::config::ApiConfig;
use relaydash_core::AccessControl;
use relaydash_core::store::PgStore;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server. Flags override the environment
/// (see [`ApiConfig::from_env`]).
#[derive(Parser, Debug)]
#[command(name = "relaydash_server", about = "Relaydash API server")]
struct Args {
    /// Address to listen on.
    #[arg(long)]
    bind_addr: Option<String>,

    /// PostgreSQL connection URL.
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// `iss` claim written into issued tokens.
    #[arg(long)]
    token_issuer: Option<String>,

    /// Password for the bootstrap `admin` account. Prefer `ADMIN_PASSWORD`
    /// over the flag so it stays out of the process list.
    #[arg(long)]
    admin_password: Option<String>,

    /// Keep all state in memory instead of PostgreSQL. Nothing survives a
    /// restart.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

impl Args {
    fn apply(&self, config: &mut ApiConfig) {
        if let Some(addr) = &self.bind_addr {
            config.bind_addr = addr.clone();
        }
        if let Some(url) = &self.database_url {
            config.pg_connection_url = url.clone();
        }
        if let Some(issuer) = self.token_issuer.as_ref().filter(|s| !s.is_empty()) {
            config.token_issuer = issuer.clone();
        }
        if let Some(password) = self.admin_password.as_ref().filter(|p| !p.is_empty()) {
            config.admin_password = Some(password.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,relaydash_api=debug,relaydash_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    args.apply(&mut config);
    info!(
        ?config,
        in_memory = args.in_memory,
        version = relaydash_core::version(),
        "starting relaydash_server"
    );

    let access = if args.in_memory {
        warn!("using in-memory store; state is lost on exit");
        AccessControl::in_memory(&config.token_issuer)
    } else {
        info!(max_connections = args.max_connections, "configuring connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&config.pg_connection_url)
            .await?;

        info!("running database migrations");
        relaydash_api::migrate(&pool).await?;

        AccessControl::postgres(PgStore::new(pool), &config.token_issuer)
    };

    access.bootstrap(config.admin_password.as_deref()).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;

    let state = relaydash_api::AppState { access };
    let app = relaydash_api::router(state);

    info!(addr = %local_addr, "REST API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
