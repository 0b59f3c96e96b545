use clap::Parser;
use propd::config::schema::{AppConfig, SensorKind};
use propd::console::output::OutputSink;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// propd: show controller for an interactive animated prop
#[derive(Parser)]
#[command(name = "propd", version, about)]
struct Cli {
    /// Path to the config file (TOML).
    #[arg(short, long, default_value = "/etc/propd/config.toml")]
    config: PathBuf,

    /// Enable JSON log output (for journald).
    #[arg(long)]
    json: bool,

    /// Validate config and exit.
    #[arg(long)]
    check: bool,
}

fn summary(config: &AppConfig) -> String {
    let sensor = match config.detector.sensor {
        SensorKind::Tofsense => format!("tofsense on {}", config.detector.device.display()),
        SensorKind::Scripted => format!("scripted ({} readings)", config.detector.readings.len()),
        SensorKind::None => "none".to_string(),
    };
    let network = if config.network.enabled {
        format!("{}:{}", config.network.multicast_addr, config.network.port)
    } else {
        "disabled".to_string()
    };
    format!(
        "config OK: tables idle/local/remote = {}/{}/{} steps, sensor {sensor}, network {network}",
        config.tables.idle.len(),
        config.tables.local.len(),
        config.tables.remote.len(),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output = OutputSink::stdout();

    // Init tracing.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("propd=info"));

    if cli.json {
        fmt()
            .with_env_filter(filter)
            .with_writer(output.clone())
            .json()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(output.clone())
            .init();
    }

    info!("propd v{}", env!("CARGO_PKG_VERSION"));

    // Load config.
    let config_path = cli
        .config
        .canonicalize()
        .unwrap_or_else(|_| cli.config.clone());
    let config = propd::config::load(&config_path)?;

    if cli.check {
        println!("{}", summary(&config));
        return Ok(());
    }

    info!(
        "loaded config: {} idle steps, autostart {}",
        config.tables.idle.len(),
        config.show.autostart
    );

    // Run the daemon.
    propd::daemon::run(config, config_path, output).await?;

    Ok(())
}
