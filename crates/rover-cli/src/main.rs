//! `rover` – rover control station entry point.
//!
//! 1. Loads `~/.rover/config.toml`, writing the defaults on first run.
//! 2. Wires the runtime to the simulated actuator bank and sensors, with
//!    the tracks behind H-bridge PWM outputs when `pwm_motors` is set.
//! 3. Starts the acquisition, sensor and telemetry tasks and serves the
//!    cockpit (websocket, REST, SSE) on the configured port.
//! 4. Intercepts **Ctrl-C** to stop every axis before exiting.

mod config;

use colored::Colorize;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, warn};

use rover_cockpit::CockpitServer;
use rover_hal::sim::SimRig;
use rover_runtime::telemetry::init_tracing;
use rover_runtime::{Hardware, RoverRuntime};

#[tokio::main]
async fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG (default "info"), ROVER_LOG_FORMAT=json for log aggregators,
    // OTEL_EXPORTER_OTLP_ENDPOINT to export spans. User-facing output still
    // uses println!.
    let _tracing = init_tracing("rover");

    print_banner();

    let cfg = load_config();

    // ── Hardware ──────────────────────────────────────────────────────────
    let rig = if cfg.pwm_motors {
        SimRig::new().with_pwm_motors()
    } else {
        SimRig::new()
    };
    let runtime = match RoverRuntime::new(cfg.to_runtime_config(), Hardware::simulated(&rig)) {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            println!("{}: {}", "Startup error".red(), e);
            std::process::exit(1);
        }
    };
    let motors = if cfg.pwm_motors { "pwm h-bridge" } else { "motor bridge" };
    println!("  Hardware: {} ({motors})", "simulated".yellow());
    let background = runtime.spawn_background();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping all axes …".yellow().bold());
        shutdown_signal.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; axes will not be stopped on Ctrl-C");
    }

    println!(
        "  Cockpit on port {}  (ws, /api/calibration, /api/servo/shoulder, /api/events)\n",
        cfg.port.to_string().bold()
    );

    let server = CockpitServer::new(Arc::clone(&runtime)).with_port(cfg.port);
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "cockpit stopped");
                println!("{}: {}", "Cockpit error".red(), e);
            }
        }
        () = shutdown.notified() => {}
    }

    match runtime.stop_all().await {
        Ok(_) => println!("{}", "  ✓ All axes stopped.".green()),
        Err(e) => println!("{}: {}", "  Stop failed".red(), e),
    }
    for task in background {
        task.abort();
    }
    println!("{}", "  ✓ Exiting rover.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

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
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save(&config::Config::default()) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____                        "#.bold().cyan());
    println!("{}", r#"  / __ \____ _   _____  _____  "#.bold().cyan());
    println!("{}", r#" / /_/ / __ \ | / / _ \/ ___/  "#.bold().cyan());
    println!("{}", r#"/ _, _/ /_/ / |/ /  __/ /      "#.bold().cyan());
    println!("{}", r#"/_/ |_|\____/|___/\___/_/       "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "rover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Tracked rover control station");
    println!();
}
