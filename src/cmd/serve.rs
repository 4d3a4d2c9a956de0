//! API server command (`helpdesk serve`).

use anyhow::Result;
use helpdesk::config::HelpdeskConfig;

pub async fn cmd_serve(config: HelpdeskConfig) -> Result<()> {
    tracing::debug!(?config, "Starting with resolved configuration");
    helpdesk::desk::server::start_server(config).await
}
