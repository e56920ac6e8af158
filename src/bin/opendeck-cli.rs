use anyhow::Context;
use clap::{Parser, Subcommand};
use image::GenericImageView;
use opendeck::error::DeviceError;
use opendeck::protocol::{ButtonImage, ButtonPosition, Feature, PixelFormat, Size};
use opendeck::transport::DeviceClient;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

/// opendeck-cli — inspect and drive a device over the device protocol
#[derive(Parser)]
#[command(name = "opendeck-cli", version, about)]
struct Cli {
    /// Device server address.
    #[arg(short, long, default_value = "127.0.0.1:8020")]
    addr: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print device metadata and features.
    Info,

    /// Set a button label.
    Label { x: u32, y: u32, text: String },

    /// Load an image file and show it on a button.
    Image { x: u32, y: u32, path: PathBuf },

    /// Resize the button grid.
    Size { width: u32, height: u32 },

    /// Print button events until interrupted.
    Events,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opendeck=warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut client = DeviceClient::connect(&cli.addr)
        .await
        .with_context(|| format!("connecting to {}", cli.addr))?;

    match cli.command {
        Command::Info => {
            let meta = client.get_meta().await?;
            println!("{}", meta.device_id);
            println!("{}", meta.device_type_id);
            println!("{}", meta.grid_size);
            for feature in &meta.features {
                println!("+ {}", describe(feature));
            }
        }
        Command::Label { x, y, text } => {
            client
                .set_button_label(ButtonPosition::new(x, y), &text)
                .await?;
        }
        Command::Image { x, y, path } => {
            let image = load_rgba(&path)?;
            client
                .set_button_image(ButtonPosition::new(x, y), image)
                .await?;
        }
        Command::Size { width, height } => {
            client.set_grid_size(Size::new(width, height)).await?;
        }
        Command::Events => {
            let mut events = client.event_stream().await?;
            loop {
                let event = tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.next() => event?,
                };
                let Some(event) = event else {
                    eprintln!("stream ended by server");
                    break;
                };
                let pos = event.button();
                println!("{} {} {}", event.kind(), pos.x, pos.y);
            }
        }
    }

    Ok(())
}

fn describe(feature: &Feature) -> String {
    match feature {
        Feature::Label { max_length } => format!("label:{max_length}"),
        Feature::Display {
            preferred_resolution,
        } => format!("display:{preferred_resolution}"),
        Feature::CustomGrid { min_size, max_size } => format!("custom_grid:{min_size}:{max_size}"),
        Feature::Custom { name } => format!("custom:{name}"),
    }
}

fn load_rgba(path: &Path) -> opendeck::error::Result<ButtonImage> {
    let img = image::open(path).map_err(|e| DeviceError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    let (width, height) = img.dimensions();

    Ok(ButtonImage {
        pixel_data: img.to_rgba8().into_raw(),
        format: PixelFormat::Rgba32,
        size: Size::new(width, height),
    })
}
