//! `tactile` – interactive driver for the touch event bridge.
//!
//! 1. Loads `~/.tactile/config.toml`, writing the defaults on first run.
//! 2. Opens the recording database and a recording session.
//! 3. Builds the bumper, head and hand adapters on an in-process bus and
//!    prints everything they publish.
//! 4. Drops into the console (`/help` lists commands).
//! 5. On Ctrl-C or `/quit`, stops every adapter before exiting.

mod config;
mod console;
mod driver;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

use tactile_recorder::GlobalRecorder;

use driver::TouchDriver;

fn main() {
    let _telemetry = telemetry::init_tracing("tactile");

    print_banner();

    let cfg = load_config();

    let recorder = match GlobalRecorder::open(&cfg.recording_db) {
        Ok(recorder) => recorder,
        Err(e) => {
            error!(path = %cfg.recording_db.display(), error = %e, "cannot open recording database");
            println!("{}: {}", "Recorder error".red(), e);
            return;
        }
    };
    let label = format!("tactile-cli {}", chrono::Utc::now().to_rfc3339());
    if let Err(e) = recorder.start_recording(&label) {
        warn!(error = %e, "recording session not opened; dumps will be skipped");
    }
    println!(
        "  Recording to {}",
        cfg.recording_db.display().to_string().bold()
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("{}: {}", "Runtime error".red(), e);
            return;
        }
    };

    let driver = Arc::new(TouchDriver::build(&cfg, recorder));
    driver.spawn_listeners(runtime.handle());

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    let driver_for_ctrlc = driver.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping adapters …".yellow().bold());
        driver_for_ctrlc.shutdown();
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    println!(
        "  {} event(s) ready: {}",
        driver.registry().len(),
        driver.registry().names().join(", ").bold()
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    console::run(&driver, shutdown);

    driver.shutdown();
    runtime.shutdown_background();
}

fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            match config::save(&config::Config::default()) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::fallback()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::fallback()
        }
    }
}

fn print_banner() {
    println!();
    println!("  {} {}",
        "Tactile".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Bumper, head and hand contact bridge");
    println!();
}
