use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use shooting_stars_core::{Activity, AppConfig, Pipeline, TwinklyConnector};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> shooting_stars_core::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = cli.config()?;
    let activity: Activity = cli.activity.parse()?;
    tracing::info!(
        server = %config.server.websocket_url(),
        %activity,
        device = config.device.device_id.as_deref().unwrap_or("any"),
        "starting controller"
    );

    let connector = Arc::new(TwinklyConnector::new(&config.device)?);
    let pipeline = Pipeline::new(config, activity, connector);
    pipeline
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

fn init_tracing(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives the Shooting Stars light sculpture", long_about = None)]
struct Cli {
    /// `host:port` of the state server.
    server_host: String,
    /// One of lights, blocks, paint or presence.
    #[arg(short, long, default_value = "lights")]
    activity: String,
    /// Name of the device to drive; the first one found when omitted.
    #[arg(short, long)]
    device_id: Option<String>,
    /// Controller token for authenticated publications and methods.
    #[arg(short, long)]
    token: Option<String>,
    /// Light layout file used by the paint activity.
    #[arg(long)]
    layout: Option<PathBuf>,
    /// JSON config file; flags take precedence over its values.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Connect with `wss://`.
    #[arg(long)]
    secure: bool,
    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn config(&self) -> shooting_stars_core::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        config.server.host = self.server_host.clone();
        if self.secure {
            config.server.secure = true;
        }
        if let Some(token) = &self.token {
            config.server.token = Some(token.clone());
        }
        if let Some(device_id) = &self.device_id {
            config.device.device_id = Some(device_id.clone());
        }
        if let Some(layout) = &self.layout {
            config.render.layout_path = layout.clone();
        }
        Ok(config)
    }
}
