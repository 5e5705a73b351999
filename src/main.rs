use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use libsql_do_http::database::sqlite::SqliteExecutor;
use libsql_do_http::database::Executor;
use libsql_do_http::{hrana, http};

/// libSQL HTTP protocol server
#[derive(Debug, Parser)]
#[command(name = "do-sqld")]
#[command(about = "libSQL HTTP protocol server", version, long_about = None)]
struct Cli {
    #[clap(long, short, default_value = "data.sqld", env = "DO_SQLD_DB_PATH")]
    db_path: PathBuf,

    #[clap(
        long,
        default_value = "127.0.0.1:8080",
        env = "DO_SQLD_HTTP_LISTEN_ADDR"
    )]
    http_listen_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let db: Arc<dyn Executor> = Arc::new(
        SqliteExecutor::open(&cli.db_path)
            .with_context(|| format!("Could not open database at {}", cli.db_path.display()))?,
    );

    let hrana_http_srv = Arc::new(hrana::http::Server::new());
    tokio::spawn({
        let srv = hrana_http_srv.clone();
        async move { srv.run_expire().await }
    });

    let app = http::into_service(http::router(db, hrana_http_srv));

    tracing::info!("listening for HTTP requests on {}", cli.http_listen_addr);
    axum::Server::bind(&cli.http_listen_addr)
        .serve(tower::make::Shared::new(app))
        .await
        .context("http server")?;

    Ok(())
}
