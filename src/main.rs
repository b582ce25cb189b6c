//! terrariumd: enclosure controller daemon.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  SysfsGpio / SimGpio   MemoryStore   LogNotifier  SystemClock│
//! │  (GpioBackend)         (Storage)     (Notify)     (Clock)    │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │            ControlService (pure logic)                 │  │
//! │  │  cache · hysteresis · lockout · daylight · relays      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  Runtime (acquisition · pulse · maintenance) · console       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `terrariumd [--config <path>] [--simulate]`
//!
//! Console lines on stdin: `relay <id> on|off`, `schedule <HH:MM> <HH:MM>`.
//! SIGINT/SIGTERM stops the daemon with every relay OFF.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{error, info, warn};

use terrarium::adapters::log_sink::LogNotifier;
use terrarium::adapters::memory_store::MemoryStore;
use terrarium::adapters::sim::{SimGpio, SimResponse};
use terrarium::adapters::sysfs_gpio::SysfsGpio;
use terrarium::adapters::time::SystemClock;
use terrarium::app::commands::Command;
use terrarium::app::ports::StoragePort;
use terrarium::app::service::{Collaborators, ControlService};
use terrarium::config::SystemConfig;
use terrarium::drivers::gpio::Gpio;
use terrarium::drivers::task::spawn_worker;
use terrarium::model::Measurement;
use terrarium::runtime::{Runtime, Shutdown};
use terrarium::scheduler::DaylightWindow;
use terrarium::sensors;

struct Args {
    config: Option<PathBuf>,
    simulate: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        simulate: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config = Some(it.next().context("--config needs a path")?.into());
            }
            "--simulate" => args.simulate = true,
            "--help" | "-h" => {
                println!("usage: terrariumd [--config <path>] [--simulate]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<SystemConfig> {
    let config = match &args.config {
        Some(path) => SystemConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            SystemConfig::default()
        }
    };
    config.validate().context("invalid configuration")?;

    for c in config.pin_conflicts() {
        warn!("{} assigned to {:?} and {:?}; {:?} will be skipped", c.pin, c.first, c.second, c.second);
    }
    if let Some(d) = &config.daylight {
        if let Err(e) = DaylightWindow::parse(&d.on, &d.off) {
            warn!("{} - daylight relay will not be scheduled until fixed", e);
        }
    }
    Ok(config)
}

fn open_gpio(config: &SystemConfig, simulate: bool) -> Gpio {
    if simulate {
        let sim = SimGpio::real_time();
        for (i, ch) in config.channels.iter().enumerate() {
            sim.attach_sensor(
                ch.pin,
                SimResponse::Reply(Measurement {
                    temperature_c: 27.5 + i as f32,
                    humidity_pct: 55.0 + 5.0 * i as f32,
                }),
            );
        }
        info!("GPIO: simulated backend with {} sensors", config.channels.len());
        return Gpio::new(Arc::new(sim));
    }

    match SysfsGpio::detect(&config.gpio) {
        Ok(backend) => Gpio::new(Arc::new(backend)),
        Err(e) => {
            warn!("╔══════════════════════════════════════════════════════╗");
            warn!("║  {}", e);
            warn!("║  SOFTWARE-ONLY MODE: relays tracked in memory,       ║");
            warn!("║  sensors will not be read.                           ║");
            warn!("╚══════════════════════════════════════════════════════╝");
            Gpio::software_only()
        }
    }
}

/// Read operator commands from stdin until EOF or shutdown.
fn spawn_console(service: Arc<ControlService>, shutdown: Shutdown) -> Result<()> {
    spawn_worker("console", 32, move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if shutdown.is_triggered() {
                return;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<Command>() {
                Ok(cmd) => {
                    if let Err(e) = service.handle_command(cmd) {
                        warn!("console: {}", e);
                    }
                }
                Err(e) => warn!("console: {}", e),
            }
        }
    })
    .context("spawning console thread")?;
    Ok(())
}

fn main() -> Result<()> {
    let log_level = std::env::var("TERRARIUM_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();

    info!("╔══════════════════════════════════════╗");
    info!("║  terrariumd v{}                   ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let args = parse_args()?;
    let config = load_config(&args)?;

    // ── Collaborators ─────────────────────────────────────────
    let store = Arc::new(MemoryStore::new());
    if let Err(e) = store.upsert_config(&config) {
        warn!("Config not persisted: {}", e);
    }
    let deps = Collaborators {
        storage: store,
        notifier: Arc::new(LogNotifier::new()),
        clock: Arc::new(SystemClock),
    };

    // ── Hardware: relays first (forced OFF), then sensor channels ──
    let gpio = open_gpio(&config, args.simulate);
    info!("GPIO backend: {}", gpio.backend_name());
    let service = Arc::new(ControlService::new(config.clone(), &gpio, deps));
    let _fail_safe = service.fail_safe_guard();
    let channels = sensors::open_channels(&gpio, &config.channels, &config.timing);
    info!("{} of {} sensor channels open", channels.len(), config.channels.len());

    // ── Shutdown wiring ───────────────────────────────────────
    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.trigger()).context("installing signal handler")?;
    }
    spawn_console(service.clone(), shutdown.clone())?;

    // ── Run ───────────────────────────────────────────────────
    let control = Runtime::new(service.clone(), channels, shutdown.clone())
        .spawn()
        .context("spawning control thread")?;
    info!("System ready.");

    if control.join().is_err() {
        error!("control thread panicked");
    }
    service.shutdown();
    info!("terrariumd stopped, all relays OFF");
    Ok(())
}
