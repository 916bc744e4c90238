//! Connect command - bring the tether up and hold it

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tveil_core::config::{Config, InterfacePreference};
use tveil_core::machine::{ConnectionManager, ConnectionState, RequestOutcome};
use tveil_core::ErrorRecord;

use crate::sink::ConsoleSink;

/// Connect command arguments
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// USB tethering only
    #[arg(long, conflicts_with = "wifi")]
    pub usb: bool,

    /// WiFi hotspot only
    #[arg(long)]
    pub wifi: bool,

    /// TCP port of the proxy on the phone
    #[arg(long, value_name = "PORT")]
    pub proxy_port: Option<u16>,

    /// Give up after the first failure instead of auto-reconnecting
    #[arg(long)]
    pub no_auto_reconnect: bool,

    /// Validate the configuration and show the layer plan without touching
    /// the network
    #[arg(long)]
    pub check: bool,
}

impl ConnectArgs {
    fn apply(&self, config: &mut Config) {
        if self.usb {
            config.general.interface = InterfacePreference::Usb;
        }
        if self.wifi {
            config.general.interface = InterfacePreference::Wifi;
        }
        if let Some(port) = self.proxy_port {
            config.general.proxy_port = port;
        }
        if self.no_auto_reconnect {
            config.general.auto_reconnect = false;
        }
    }
}

/// Execute the connect command
pub fn execute(args: ConnectArgs, mut config: Config, quiet: bool) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let components = tveil_platform::default_components(&config)?;

    if args.check {
        let enabled: Vec<&str> = components
            .layers
            .layers()
            .iter()
            .filter(|l| config.layers.enabled(&l.id))
            .map(|l| l.id.as_str())
            .collect();
        println!("configuration is valid");
        println!("bypass layers, in activation order: {}", enabled.join(" -> "));
        return Ok(());
    }

    let sink = Arc::new(ConsoleSink::new(quiet));
    let handle = ConnectionManager::spawn(config, components, sink)?;

    // First ctrl-c disconnects cleanly; teardown always runs
    let requester = handle.requester();
    ctrlc::set_handler(move || {
        eprintln!("interrupt received, disconnecting");
        requester.disconnect();
    })?;

    match handle.connect() {
        RequestOutcome::Accepted => {}
        outcome => bail!("connect request rejected: {outcome:?}"),
    }

    let state = wait_forever(&handle, |s| {
        matches!(s, ConnectionState::Connected | ConnectionState::Disconnected)
    });

    if state == ConnectionState::Connected {
        info!("tether established, press ctrl-c to disconnect");
        // Hold until the session ends, however it ends
        wait_forever(&handle, |s| s == ConnectionState::Disconnected);
    }

    let last_error = handle.last_error();
    handle.shutdown();

    match last_error {
        Some(record) => {
            report_error(&record);
            bail!("disconnected after error: {}", record.message);
        }
        None => Ok(()),
    }
}

fn wait_forever<F>(handle: &tveil_core::ConnectionHandle, pred: F) -> ConnectionState
where
    F: Fn(ConnectionState) -> bool + Copy,
{
    loop {
        let state = handle.wait_for(pred, Duration::from_secs(3600));
        if pred(state) {
            return state;
        }
    }
}

fn report_error(record: &ErrorRecord) {
    eprintln!();
    eprintln!(
        "{} [{}] {}",
        "error:".red().bold(),
        record.category,
        record.message
    );
    eprintln!("  cause: {}", record.source);
    if record.remediation_attempted {
        eprintln!("  an automatic fix was attempted and did not resolve it");
    }
    if !record.manual_steps.is_empty() {
        eprintln!("  manual steps:");
        for step in &record.manual_steps {
            eprintln!("    - {step}");
        }
    }
}
