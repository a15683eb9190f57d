use tracing::{error, info};

mod config;
mod connection;
mod dispatch;
mod replication;
mod server;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = config::ServerConfig::from_env();
    info!(addr = %cfg.addr, role = ?cfg.role, "flashdb starting");

    if let Err(e) = server::run(cfg).await {
        error!("fatal: {e}");
        std::process::exit(1);
    }
}
