use clap::Parser;
use color_eyre::eyre::Result;
use ledstrip_bledom::*;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Keeps one strip connected and answers get/set requests, one per stdin line
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Peripheral id or MAC address of the strip
    #[arg(short, long, env = "LEDSTRIP_DEVICE")]
    device: Option<String>,

    /// Accessory name shown in logs
    #[arg(short, long, env = "LEDSTRIP_NAME", default_value = "LedStrip")]
    name: String,

    /// How long a command waits for the strip to become reachable (ms)
    #[arg(long, env = "LEDSTRIP_READY_TIMEOUT_MS", default_value_t = 10_000)]
    ready_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ledstrip_bledom=info")),
        )
        .compact()
        .with_writer(std::io::stderr)
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    let settings = Settings::default().with_ready_timeout(Duration::from_millis(cli.ready_timeout_ms));
    let (transport, events) = BleTransport::new().await?;
    let accessory = Accessory::new(
        AccessoryConfig {
            name: cli.name,
            uuid: cli.device,
        },
        Arc::new(transport),
        events,
        settings,
    );
    info!("{} ready for commands", accessory.name());

    // Inform about successful initialization
    println!("OK");

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed, shutting down");
                    break;
                };
                match handle(&accessory, line.trim()) {
                    Ok(reply) => println!("{reply}"),
                    Err(reason) => println!("ERR {reason}"),
                }
            }
        }
    }

    Ok(())
}

/// Runs one `command[:argument]` line and returns the reply
fn handle(accessory: &Accessory, line: &str) -> std::result::Result<String, String> {
    let (command, argument) = match line.split_once(':') {
        Some((command, argument)) => (command, Some(argument.trim())),
        None => (line, None),
    };
    let ok = |result: ledstrip_bledom::Result<()>| {
        result.map(|()| "OK".to_string()).map_err(|e| e.to_string())
    };

    match command {
        "get_power" => accessory
            .get_power()
            .map(|on| u8::from(on).to_string())
            .map_err(|e| e.to_string()),
        "get_brightness" => accessory
            .get_brightness()
            .map(|b| b.to_string())
            .map_err(|e| e.to_string()),
        "get_hue" => accessory
            .get_hue()
            .map(|h| h.to_string())
            .map_err(|e| e.to_string()),
        "get_saturation" => accessory
            .get_saturation()
            .map(|s| s.to_string())
            .map_err(|e| e.to_string()),
        "set_power" => {
            let on = match argument {
                Some("1") | Some("on") | Some("true") => true,
                Some("0") | Some("off") | Some("false") => false,
                _ => return Err("Power must be 0 or 1".into()),
            };
            ok(accessory.set_power(on))
        }
        "set_brightness" => {
            let level = parse(argument, "brightness")?;
            ok(accessory.set_brightness(level))
        }
        "set_hue" => {
            let hue = parse(argument, "hue")?;
            ok(accessory.set_hue(hue))
        }
        "set_saturation" => {
            let saturation = parse(argument, "saturation")?;
            ok(accessory.set_saturation(saturation))
        }
        "set_color" => {
            let rgb = argument
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().parse::<u8>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| "Invalid color format. Use R,G,B (e.g., 255,0,0 for red)")?;
            let [red, green, blue] = rgb[..] else {
                return Err("Invalid color format. Use R,G,B (e.g., 255,0,0 for red)".into());
            };
            let strip = accessory.strip().map_err(|e| e.to_string())?;
            // answered before the strip confirms; the queue logs the outcome
            let _ = strip.set_rgb(red, green, blue);
            Ok("OK".into())
        }
        "status" => {
            let strip = accessory.strip().map_err(|e| e.to_string())?;
            Ok(format!("{:?}", strip.link_state()))
        }
        "" => Err("No command given".into()),
        other => Err(format!("Unknown command: {other}")),
    }
}

fn parse<T: std::str::FromStr>(argument: Option<&str>, what: &str) -> std::result::Result<T, String> {
    argument
        .ok_or_else(|| format!("no {what} given"))?
        .parse()
        .map_err(|_| format!("invalid {what}"))
}
