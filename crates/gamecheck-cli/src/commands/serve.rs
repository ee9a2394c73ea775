//! Serve command - run the HTTP gateway.

use anyhow::Result;
use gamecheck_core::Config;
use gamecheck_gateway::Gateway;

use crate::ui;

/// Serve command arguments.
#[derive(Debug, Clone, Default)]
pub struct ServeArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
}

/// Start the gateway server and block until Ctrl-C.
pub async fn run_serve(mut config: Config, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    config.validate()?;

    let address = format!("{}:{}", config.server.bind_address, config.server.port);
    if std::net::TcpListener::bind(&address).is_err() {
        anyhow::bail!("Address {address} is already in use");
    }

    ui::header("Starting GameCheck Gateway");
    ui::kv("Address", &address);
    ui::kv("Auth", if config.auth.enabled { "enabled" } else { "disabled" });
    ui::kv("History per user", &config.history.max_per_owner.to_string());
    println!();
    ui::info("Press Ctrl+C to stop");

    let gateway = Gateway::new(config)?;
    gateway.run().await?;

    ui::success("Gateway stopped");
    Ok(())
}
