//! RPiTube server.

use anyhow::Context;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use rpitube::{
    config::{CliOverrides, Config},
    create_app_with_state,
    discovery::pick_receiver,
    network,
    state::AppState,
};

/// RPiTube - cast web videos to a Chromecast
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "RPITUBE_PORT")]
    port: Option<u16>,

    /// Password of the VLC web interface
    #[arg(long)]
    vlc_password: Option<String>,

    /// Directory downloaded videos are kept in
    #[arg(long)]
    cache_folder: Option<PathBuf>,

    /// Log spawned commands and discovered devices
    #[arg(long)]
    verbose: bool,

    /// Cookies file passed to yt-dlp
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Receiver address; skips discovery when set
    #[arg(long)]
    chromecast_ip: Option<IpAddr>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            port: self.port,
            vlc_password: self.vlc_password,
            cache_dir: self.cache_folder,
            verbose: self.verbose,
            cookies_file: self.cookies,
            receiver_ip: self.chromecast_ip,
            log_file: self.log_file,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_figment(args.into_overrides())?;

    let _log_guard = init_logging(&config)?;
    info!("Starting RPiTube server...");

    let state = AppState::new(config.clone());

    let receiver = select_receiver(&state).await?;
    state.set_default_receiver(Some(receiver));

    let app = create_app_with_state(state.clone()).await;

    // Bind to 0.0.0.0 to be reachable from phones on the same network
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let host = network::local_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    info!("Server listening on {}", addr);
    info!("API URL: http://{}:{}/api/cast", host, config.port);
    info!("VLC interface: {}", network::vlc_interface_url());

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down gracefully...");
        shutdown_state.orchestrator().stop().await;
        shutdown_state.events().close();
        info!("Server shutting down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Console logging plus an optional plain-text log file.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    });

    let console = fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::new(Rfc3339))
        .compact();

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(UtcTime::new(Rfc3339));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Receiver from the configuration, or the first one found on the network.
async fn select_receiver(state: &AppState) -> anyhow::Result<IpAddr> {
    let config = state.config();
    if let Some(ip) = config.receiver_ip {
        info!("Using configured receiver {}", ip);
        return Ok(ip);
    }

    info!(
        "Searching for Chromecast devices ({} ms)...",
        config.discovery_timeout.as_millis()
    );
    let devices = state
        .discovery()
        .discover(config.discovery_timeout)
        .await
        .context("Chromecast discovery failed")?;

    if config.verbose {
        for device in &devices {
            info!(
                "Device {}: host={:?} port={:?} addresses={:?} txt={:?}",
                device.instance_name, device.host, device.port, device.addresses, device.raw_txt
            );
        }
    }

    let (device, ip) = pick_receiver(&devices).context(
        "No Chromecast found on the network, pass --chromecast-ip to set one manually",
    )?;
    info!(
        "Found {} ({}) at {}",
        device.model(),
        device.friendly_name(),
        ip
    );
    Ok(ip)
}
