mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use easypad_core::{Axis, BackendChoice, Buttons, Config, Gamepads, GamepadState, Report};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "easypad", about = "Virtual gamepad tools")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured backend (auto, mock, unsupported, mac-hid, vjoy, uinput).
    #[arg(long, global = true)]
    backend: Option<BackendChoice>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Report whether this host can create virtual gamepads.
    Probe,
    /// Provision the platform driver if it is missing.
    Install,
    /// Create a pad, press A, sweep the left stick, then destroy it.
    Demo {
        #[arg(long, default_value_t = 2000)]
        hold_ms: u64,
    },
    /// Print the 12-byte report for a state without touching any backend.
    Report {
        /// Button indices to hold down.
        #[arg(long, value_delimiter = ',')]
        buttons: Vec<usize>,
        /// Axis values as `index=value`, e.g. `4=32767`.
        #[arg(long = "axis", value_parser = parse_axis)]
        axes: Vec<(usize, i16)>,
    },
    /// JSON-lines control session on stdin/stdout.
    Serve,
}

fn parse_axis(s: &str) -> Result<(usize, i16), String> {
    let (index, value) = s.split_once('=').ok_or("expected index=value")?;
    let index = index.trim().parse().map_err(|e| format!("axis index: {e}"))?;
    let value = value.trim().parse().map_err(|e| format!("axis value: {e}"))?;
    Ok((index, value))
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default().with_env_override()?,
    };
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.cmd {
        Cmd::Report { buttons, axes } => print_report(&buttons, &axes)?,
        Cmd::Probe => {
            let pads = start(&config);
            let supported = pads.is_supported();
            println!("{}", if supported { "supported" } else { "unsupported" });
        }
        Cmd::Install => {
            if !start(&config).install().await {
                bail!("driver installation did not make the platform supported");
            }
            println!("installed");
        }
        Cmd::Demo { hold_ms } => demo(&start(&config), Duration::from_millis(hold_ms)).await?,
        Cmd::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            session::serve(&start(&config), stdin, tokio::io::stdout()).await?;
        }
    }
    Ok(())
}

fn start(config: &Config) -> Gamepads {
    let pads = Gamepads::from_config(config);
    info!(backend = pads.registry().backend_name(), "easypad starting");
    pads
}

fn print_report(buttons: &[usize], axes: &[(usize, i16)]) -> Result<()> {
    let mut state = GamepadState::default();
    for &index in buttons {
        let button = Buttons::from_index(index).with_context(|| format!("button index {index}"))?;
        state.set_button(button, true);
    }
    for &(index, value) in axes {
        let axis = Axis::from_index(index).with_context(|| format!("axis index {index}"))?;
        state.set_axis(axis, value);
    }
    println!("{}", Report::from(&state).to_hex());
    Ok(())
}

async fn demo(pads: &Gamepads, hold: Duration) -> Result<()> {
    let id = pads.create().context("could not create virtual gamepad")?;
    let mut lifecycle = pads.registry().watch(id)?;
    let settled = *lifecycle.wait_for(|s| s.is_settled()).await?;
    info!(%id, ?settled, "activation settled");
    if !settled.is_active() {
        warn!(%id, "device did not activate; reports may be dropped");
    }

    pads.button_down(id, 0);
    tokio::time::sleep(hold / 2).await;
    pads.button_up(id, 0);

    let steps = 16;
    for step in 0..=steps {
        let v = -1.0 + 2.0 * f64::from(step) / f64::from(steps);
        pads.set_axis_normalized(id, 0, v);
        tokio::time::sleep(hold / (2 * steps)).await;
    }
    pads.set_axis(id, 0, 0);

    pads.destroy(id);
    println!("demo finished on device {id}");
    Ok(())
}
