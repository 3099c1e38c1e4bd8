//! HTTP server command: `sitegen serve`.

use anyhow::Result;

use sitegen::config::Config;
use sitegen::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: Config,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let mut server = ServerConfig::from_config(config);
    if let Some(host) = host {
        server.host = host;
    }
    if let Some(port) = port {
        server.port = port;
    }
    server.dev_mode = dev;

    start_server(server).await
}
