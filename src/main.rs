use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// opendeck-device — headless virtual button deck served over the device protocol
#[derive(Parser)]
#[command(name = "opendeck-device", version, about)]
struct Cli {
    /// Path to the config file (TOML).
    #[arg(short, long, default_value = "/etc/opendeck/device.toml")]
    config: PathBuf,

    /// Enable JSON log output (for journald).
    #[arg(long)]
    json: bool,

    /// Validate config and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Init tracing.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opendeck=info"));

    if cli.json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }

    info!("opendeck-device v{}", env!("CARGO_PKG_VERSION"));

    let config = opendeck::config::load(&cli.config)?;

    if cli.check {
        let enabled = [
            config.label.as_ref().map(|_| "label"),
            config.display.as_ref().map(|_| "display"),
            config.custom_grid.as_ref().map(|_| "custom_grid"),
        ];
        println!(
            "config OK: device {} ({}), grid {}, features: [{}]",
            config.device.id,
            config.device.type_id,
            config.device.grid,
            enabled
                .into_iter()
                .flatten()
                .map(str::to_string)
                .chain(config.custom_features.iter().cloned())
                .collect::<Vec<_>>()
                .join(", "),
        );
        return Ok(());
    }

    info!("loaded config for device {}", config.device.id);

    opendeck::daemon::run(config).await?;

    Ok(())
}
