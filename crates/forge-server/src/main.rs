//! Thin entrypoint: `sem_os_server::main`'s shape, minus the parts now
//! owned by [`forge_server::serve`].

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let cfg = forge_server::config::RuntimeConfig::from_env()?;
    forge_server::serve(cfg).await
}
