use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use ledstrip_bledom::*;
use tokio::time::Duration;
use tracing::{debug, info, instrument};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Peripheral id or MAC address of the strip
    #[arg(short, long, env = "LEDSTRIP_DEVICE")]
    device: String,

    /// How long to wait for the strip to become reachable (ms)
    #[arg(long, env = "LEDSTRIP_READY_TIMEOUT_MS", default_value_t = 10_000)]
    ready_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Turn LED strip on
    On,
    /// Turn LED strip off
    Off,
    /// Set brightness
    Brightness {
        /// Brightness level (0-100)
        #[arg(allow_negative_numbers = true)]
        level: i32,
    },
    /// Set hue, keeping full saturation
    Hue {
        /// Hue in degrees (0-360)
        degrees: f64,
    },
    /// Set saturation of the default hue
    Saturation {
        /// Saturation in percent (0-100)
        percent: f64,
    },
    /// Set custom RGB color
    Color {
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: u8,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: u8,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ledstrip_bledom=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let settings = Settings::default().with_ready_timeout(Duration::from_millis(cli.ready_timeout_ms));
    let strip = LedStrip::connect_ble(&cli.device, settings).await?;

    run(&strip, cli.command).await?;

    info!(
        "Done: power={} brightness={} hue={} saturation={}",
        strip.power(),
        strip.brightness(),
        strip.hue(),
        strip.saturation()
    );
    Ok(())
}

#[instrument(skip(strip))]
async fn run(strip: &LedStrip, command: Commands) -> Result<()> {
    match command {
        Commands::On => strip.set_power(true).await?,
        Commands::Off => strip.set_power(false).await?,
        Commands::Brightness { level } => strip
            .set_brightness(level)
            .ok_or_else(|| eyre!("Brightness must be between 0 and 100"))?
            .await?,
        Commands::Hue { degrees } => {
            strip.set_saturation(100.0).await?;
            strip.set_hue(degrees).await?
        }
        Commands::Saturation { percent } => strip.set_saturation(percent).await?,
        Commands::Color { red, green, blue } => strip.set_rgb(red, green, blue).await?,
    }
    Ok(())
}
