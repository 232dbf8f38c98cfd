//! canmon - watch a CAN bus and send frames from the command line
//!
//! Examples:
//!   canmon --interface can0
//!   canmon --plugin virtualcan --interface demo --send 123#DEADBEEF
//!   canmon --interface can0 --fd --bitrate 500000 --data-bitrate 2000000
//!
//! Set RUST_LOG=debug for verbose output

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use canmon::can::CanFrame;
use canmon::config::{BusConfig, ConnectSettings, MonitorConfig};
use canmon::frame_log::HEADERS;
use canmon::{AnyDevice, Command, FrameLog, Label, LogChange, Monitor, Presenter, available_plugins};

#[cfg(target_os = "linux")]
const DEFAULT_PLUGIN: &str = "socketcan";
#[cfg(not(target_os = "linux"))]
const DEFAULT_PLUGIN: &str = "virtualcan";

#[derive(Parser, Debug)]
#[command(name = "canmon")]
#[command(about = "CAN bus monitor: live frame log, bus status and bitrate")]
struct Args {
    /// Device plugin (use --list-plugins to see what this platform offers)
    #[arg(short, long, default_value = DEFAULT_PLUGIN)]
    plugin: String,

    /// Interface name, e.g. can0 or COM5
    #[arg(short, long, default_value = "can0")]
    interface: String,

    /// JSON file with monitor settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum rows kept in the frame log (0 = unlimited); overrides the config file
    #[arg(long)]
    capacity: Option<usize>,

    /// Nominal bitrate in bit/s
    #[arg(long)]
    bitrate: Option<u32>,

    /// Enable CAN FD
    #[arg(long)]
    fd: bool,

    /// Data phase bitrate in bit/s (CAN FD)
    #[arg(long, requires = "fd")]
    data_bitrate: Option<u32>,

    /// Enable local loopback of transmitted frames
    #[arg(long)]
    loopback: bool,

    /// Receive own transmitted frames as local echo
    #[arg(long)]
    receive_own: bool,

    /// Frame to send after connecting, as ID#DATA or ID##<flags>DATA (repeatable)
    #[arg(long = "send", value_name = "FRAME")]
    send: Vec<CanFrame>,

    /// List available plugins and exit
    #[arg(long)]
    list_plugins: bool,
}

impl Args {
    fn connect_settings(&self) -> ConnectSettings {
        let settings = ConnectSettings::new(&self.plugin, &self.interface);
        let configured = self.bitrate.is_some() || self.fd || self.loopback || self.receive_own;
        if !configured {
            return settings;
        }
        settings.with_configuration(BusConfig {
            bitrate: self.bitrate,
            can_fd: self.fd,
            data_bitrate: self.data_bitrate,
            loopback: self.loopback,
            receive_own: self.receive_own,
        })
    }
}

/// Prints status changes and new rows to stdout.
struct StdoutPresenter;

impl Presenter for StdoutPresenter {
    fn set_label(&mut self, label: Label, text: String) {
        match label {
            // updated every second, too chatty for a scrolling terminal
            Label::SessionTime | Label::Bitrate | Label::FramesReceived => {
                tracing::debug!(?label, %text)
            }
            _ => println!("-- {}", text),
        }
    }

    fn table_changed(&mut self, log: &FrameLog, change: LogChange) {
        let LogChange::Appended { inserted, .. } = change else {
            return;
        };
        let shown = inserted.min(log.row_count());
        for row in log.iter().skip(log.row_count() - shown) {
            println!("{}", row.fields().join(" "));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("canmon=info")),
        )
        .init();

    let args = Args::parse();

    if args.list_plugins {
        for plugin in available_plugins() {
            println!("{}", plugin);
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.log_capacity = capacity;
    }
    info!(?config, "starting");

    // room for every queued command, the monitor only starts reading below
    let (tx, rx) = mpsc::channel(args.send.len() + 8);
    tx.send(Command::Connect(args.connect_settings()))
        .await
        .context("Monitor stopped before connecting")?;
    for frame in &args.send {
        tx.send(Command::Send(frame.clone()))
            .await
            .context("Monitor stopped before sending")?;
    }

    let quit = tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = quit.send(Command::Quit).await;
        }
    });

    println!("{}", HEADERS.join(" "));
    let mut monitor: Monitor<AnyDevice, _> = Monitor::new(config, StdoutPresenter);
    monitor.run(rx).await;
    info!(
        received = monitor.frames_received(),
        written = monitor.frames_written(),
        "done"
    );
    Ok(())
}
