//! weave-server CLI entry point.

use std::path::PathBuf;

use weave_server::config::ComposerConfig;
use weave_server::{serve, ServerState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("weave_server=debug,tower_http=debug").init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "weave.toml".to_string());
    let config = ComposerConfig::load(&config_path)?;
    let addr = config.addr()?;

    let template_root = PathBuf::from(std::env::var("WEAVE_TEMPLATE_ROOT").unwrap_or_else(|_| "templates".to_string()));
    let state = ServerState::new(config, template_root)?;

    serve(addr, state).await
}
