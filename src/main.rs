/*
 * This file is part of nvfan.
 *
 * Copyright (C) 2025 nvfan contributors
 *
 * nvfan is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * nvfan is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with nvfan. If not, see <https://www.gnu.org/licenses/>.
 */

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use nvfan::config::load_config;
use nvfan::controller::{disable_fan_control, FanController};
use nvfan::nvidia::NvidiaSettings;
use nvfan::registry::GpuId;
use nvfan::validator::validate_config;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status after SIGINT/SIGTERM
const SIGNAL_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Stop,
}

fn print_help() {
    eprintln!("nvfan {} - curve-driven NVIDIA GPU fan control", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    nvfan run <config.json>     Take over the fans and drive them from their curves");
    eprintln!("    nvfan stop <config.json>    Hand the fans back to the driver and exit");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    NVFAN_LOG    Log level (trace, debug, info, warn, error)");
}

fn parse_args(args: &[String]) -> Option<(Command, PathBuf)> {
    if args.len() != 3 {
        return None;
    }
    let command = match args[1].as_str() {
        "run" => Command::Run,
        "stop" => Command::Stop,
        _ => return None,
    };
    Some((command, PathBuf::from(&args[2])))
}

/// Logs go to stderr; stdout carries the status stream
fn init_logging() {
    let log_level = std::env::var("NVFAN_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
}

/// Give the fans back to the driver on SIGINT/SIGTERM
fn install_signal_handler(hardware: Arc<NvidiaSettings>, gpus: Vec<GpuId>) {
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - releasing fan control");
        if let Err(e) = disable_fan_control(&*hardware, &gpus) {
            error!("Failed to release fan control: {}", e);
        }
        std::process::exit(SIGNAL_EXIT_CODE);
    }) {
        warn!("Failed to set signal handler: {}. Use `nvfan stop` after killing the process.", e);
    }
}

fn run(command: Command, config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let hardware = Arc::new(NvidiaSettings::from_config(&config));

    match command {
        Command::Stop => {
            disable_fan_control(&*hardware, &config.gpu_ids()).context("releasing fan control")?;
            Ok(())
        }
        Command::Run => {
            validate_config(&config, &*hardware).context("checking configuration")?;
            info!("STARTUP: nvfan {} controlling {} fan(s)", VERSION, config.fans.len());

            let mut controller = FanController::new(&config, hardware.clone())?;
            let _guard = controller.enable().context("taking fan control")?;
            install_signal_handler(hardware, config.gpu_ids());

            let stdout = io::stdout();
            let mut out = stdout.lock();
            controller.control_loop(&mut out).context("fan control loop")?;
            Ok(())
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let Some((command, config_path)) = parse_args(&args) else {
        print_help();
        std::process::exit(1);
    };

    init_logging();

    if let Err(err) = run(command, &config_path) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
