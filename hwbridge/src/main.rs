// SPDX-FileCopyrightText: 2025 hwbridge contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod bar;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;

use hwbridge_common::settings::Settings;
use hwbridge_common::HidlError;
use hwbridge_hidl::passthrough::LocalRuntime;
use hwbridge_hidl::BinderHandle;

use crate::bar::{BarClient, Position};

/// hwbridge - HIDL parcel and binder demo
#[derive(Parser, Debug)]
#[command(name = "hwbridge", version, about = "Talk to a HIDL service through hwbinder parcels")]
struct Args {
    /// Path to config file (default: ~/.config/hwbridge/hwbridge.ini)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface descriptor to resolve
    #[arg(short, long)]
    interface: Option<String>,

    /// Service instance name
    #[arg(long)]
    instance: Option<String>,

    /// Send ping as a one-way transaction
    #[arg(long)]
    oneway: bool,

    /// Unregister the service after the first round of calls
    #[arg(long)]
    kill_after_first: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// CLI flags win over the config file.
    fn apply(&self, settings: &mut Settings) {
        if let Some(interface) = &self.interface {
            settings.interface = interface.clone();
        }
        if let Some(instance) = &self.instance {
            settings.instance = instance.clone();
        }
        settings.oneway |= self.oneway;
        settings.kill_after_first |= self.kill_after_first;
        settings.verbose |= self.verbose;
    }
}

fn main() {
    let args = Args::parse();

    let mut settings = config::load_config(args.config.as_deref());
    args.apply(&mut settings);

    // Initialize logging
    let log_level = if settings.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("hwbridge - HIDL parcel and binder demo");
    info!("======================================");

    if let Err(err) = run(&settings) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(settings: &Settings) -> Result<()> {
    let runtime = LocalRuntime::new();
    let service = bar::install(&runtime).context("runtime has no service managers")?;
    info!("Demo service ready: {}/{}", service.descriptor(), service.instance());

    let handle = BinderHandle::query(&runtime, &settings.interface, &settings.instance)
        .with_context(|| format!("resolving {}/{}", settings.interface, settings.instance))?
        .with_context(|| format!("{}/{} is not available", settings.interface, settings.instance))?;
    info!("Connected over {}", handle.transport());

    let client = BarClient::new(handle, settings.oneway);
    call_all(&client)?;

    if settings.kill_after_first {
        info!("Unregistering {}", service.descriptor());
        if let Some(passthrough) = runtime.passthrough() {
            passthrough.unregister(service.descriptor(), service.instance());
        }
        println!("alive after unregister: {}", client.is_alive());
        match client.add(1, 1) {
            Err(HidlError::RemoteGone { .. }) => println!("add after unregister: remote gone"),
            Err(e) => warn!("add after unregister failed unexpectedly: {}", e),
            Ok(sum) => warn!("add after unregister still answered {}", sum),
        }
    }

    client.handle().release();
    info!("Done");
    Ok(())
}

fn call_all(client: &BarClient) -> Result<()> {
    match client.ping().context("ping")? {
        Some(count) => println!("ping -> {}", count),
        None => println!("ping -> (one-way)"),
    }

    let sum = client.add(20, 22).context("add")?;
    println!("add(20, 22) -> {}", sum);

    let echoed = client.echo("hello from hwbridge").context("echo")?;
    println!("echo -> {:?}", echoed);

    let start = Position {
        x: 10,
        y: 20,
        msg1: "start".to_string(),
        msg2: String::new(),
    };
    let moved = client.move_position(&start, 3, -1).context("move")?;
    println!(
        "move -> ({}, {}) msg1={:?} msg2={:?}",
        moved.x, moved.y, moved.msg1, moved.msg2
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from(["hwbridge", "--instance", "slot2", "--oneway"]);
        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.instance, "slot2");
        assert_eq!(settings.interface, bar::IBAR);
        assert!(settings.oneway);
        assert!(!settings.verbose);
    }

    #[test]
    fn test_run_default_and_kill() {
        let settings = Settings {
            kill_after_first: true,
            ..Settings::default()
        };
        assert!(run(&settings).is_ok());
    }

    #[test]
    fn test_run_unknown_instance_fails() {
        let settings = Settings {
            instance: "missing".to_string(),
            ..Settings::default()
        };
        assert!(run(&settings).is_err());
    }
}
