///
/// monitor.rs
///
/// The monitor ties a bus device, the frame log and the statistics together.
///
/// All events (frames, timer ticks and user commands) are handled on one task
/// by `Monitor::run`, so the state needs no locking. Presentation is left to
/// a `Presenter`, which receives label texts and table change notifications.
///
use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::accumulator::FrameAccumulator;
use crate::activity::{ActivitySampler, Sample, format_bitrate, format_session_time};
use crate::can::{self, CanFrame};
use crate::config::{ConnectSettings, MonitorConfig};
use crate::device::DeviceHandle;
use crate::error::{CanBusError, Result};
use crate::frame_log::{FrameLog, LogChange};
use crate::timer::RepeatingTimer;
use crate::CanBusDevice;

const NO_BUS_STATUS: &str = "No CAN bus status available.";

/// Text fields a presenter displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Connection,
    FramesWritten,
    FramesReceived,
    BusStatus,
    SessionTime,
    Bitrate,
}

/// Display side of the monitor.
pub trait Presenter {
    fn set_label(&mut self, label: Label, text: String);

    /// Called after every change of the frame log.
    fn table_changed(&mut self, log: &FrameLog, change: LogChange) {
        let _ = (log, change);
    }

    /// Called after a flush, so the view can follow the newest row.
    fn scroll_to_bottom(&mut self, log: &FrameLog) {
        let _ = log;
    }
}

/// User actions accepted by [`Monitor::run`].
#[derive(Debug, Clone)]
pub enum Command {
    Connect(ConnectSettings),
    Disconnect,
    Send(CanFrame),
    ResetController,
    ClearLog,
    SetLogCapacity(usize),
    Quit,
}

pub struct Monitor<D, P> {
    config: MonitorConfig,
    device: DeviceHandle<D>,
    log: FrameLog,
    accumulator: FrameAccumulator,
    sampler: ActivitySampler,
    frames_written: u64,
    presenter: P,
    append_timer: RepeatingTimer,
    session_timer: RepeatingTimer,
    bus_status_timer: RepeatingTimer,
}

impl<D: CanBusDevice, P: Presenter> Monitor<D, P> {
    /// Creates a disconnected monitor. The flush timer starts with [`Monitor::run`].
    pub fn new(config: MonitorConfig, mut presenter: P) -> Self {
        presenter.set_label(Label::SessionTime, format_session_time(0));
        presenter.set_label(Label::Bitrate, format_bitrate(0.0));

        Self {
            device: DeviceHandle::new(),
            log: FrameLog::new(config.log_capacity),
            accumulator: FrameAccumulator::new(config.log_capacity),
            sampler: ActivitySampler::new(config.activity_interval()),
            frames_written: 0,
            presenter,
            append_timer: RepeatingTimer::new(config.flush_interval()),
            session_timer: RepeatingTimer::new(config.activity_interval()),
            bus_status_timer: RepeatingTimer::new(config.bus_status_interval()),
            config,
        }
    }

    pub fn log(&self) -> &FrameLog {
        &self.log
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn device(&self) -> Option<&D> {
        self.device.get()
    }

    pub fn device_mut(&mut self) -> Option<&mut D> {
        self.device.get_mut()
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_connected()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_received(&self) -> u64 {
        self.accumulator.received()
    }

    /// Rows received but not yet flushed into the log.
    pub fn pending_rows(&self) -> usize {
        self.accumulator.pending()
    }

    pub fn is_sampling(&self) -> bool {
        self.session_timer.is_active()
    }

    pub fn is_polling_bus_status(&self) -> bool {
        self.bus_status_timer.is_active()
    }

    /// Processes commands and device events until `Quit` or until the
    /// command channel closes. The device is disconnected on return.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) {
        info!("monitor started");
        if !self.append_timer.is_active() {
            self.append_timer.start();
        }
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }
                result = next_frame(&mut self.device) => match result {
                    Ok(frame) => self.process_received_frame(frame),
                    Err(err) => {
                        self.release_device();
                        self.process_error(&err);
                    }
                },
                _ = self.append_timer.tick() => self.on_append_timeout(),
                _ = self.session_timer.tick() => self.on_activity_timeout(),
                _ = self.bus_status_timer.tick() => self.on_bus_status_timeout(),
            }
        }
        self.disconnect_device();
        info!(received = self.frames_received(), "monitor stopped");
    }

    pub async fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect(settings) => self.connect_device(&settings),
            Command::Disconnect => self.disconnect_device(),
            Command::Send(frame) => self.send_frame(frame).await,
            Command::ResetController => self.reset_controller(),
            Command::ClearLog => self.clear_log(),
            Command::SetLogCapacity(capacity) => self.set_log_capacity(capacity),
            Command::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Creates and connects the device described by `settings`.
    ///
    /// Refused while a device is connected. Failures are reported through the
    /// connection label and leave the monitor disconnected.
    pub fn connect_device(&mut self, settings: &ConnectSettings) {
        if self.device.is_connected() {
            warn!(plugin = %settings.plugin, "connect requested while connected");
            self.set_label(Label::Connection, "Already connected, disconnect first".into());
            return;
        }

        let device = match D::open(settings) {
            Ok(device) => device,
            Err(err) if err.is_device_creation() => {
                warn!(plugin = %settings.plugin, %err, "device creation failed");
                self.set_label(
                    Label::Connection,
                    format!(
                        "Error creating device '{}', reason: '{}'",
                        settings.plugin, err
                    ),
                );
                return;
            }
            Err(err) => {
                warn!(interface = %settings.interface, %err, "connection failed");
                self.set_label(Label::Connection, format!("Connection error: {}", err));
                return;
            }
        };

        self.device.reset(Some(device));
        self.frames_written = 0;
        info!(plugin = %settings.plugin, interface = %settings.interface, "connected");
        self.set_label(Label::Connection, connection_status(settings));

        let has_status = self.device.get().and_then(|d| d.bus_status()).is_some();
        if has_status {
            self.bus_status_timer
                .start_with(self.config.bus_status_interval());
        } else {
            self.set_label(Label::BusStatus, NO_BUS_STATUS.into());
        }
    }

    pub fn disconnect_device(&mut self) {
        if self.release_device() {
            self.set_label(Label::Connection, "Disconnected".into());
        }
    }

    /// Stops bus status polling and disconnects the device, leaving the
    /// connection label alone. Returns false if nothing was connected.
    fn release_device(&mut self) -> bool {
        let Some(mut device) = self.device.release() else {
            return false;
        };
        self.bus_status_timer.stop();
        device.disconnect();
        info!("disconnected");
        true
    }

    /// Writes `frame` to the connected device. Ignored while disconnected.
    pub async fn send_frame(&mut self, frame: CanFrame) {
        let Some(device) = self.device.get_mut() else {
            debug!("not connected, frame not sent");
            return;
        };
        match device.write_frame(frame).await {
            Ok(()) => {
                self.frames_written += 1;
                let text = format!("{} frames written", self.frames_written);
                self.set_label(Label::FramesWritten, text);
            }
            Err(err) => self.process_error(&err),
        }
    }

    pub fn reset_controller(&mut self) {
        let Some(device) = self.device.get_mut() else {
            return;
        };
        if let Err(err) = device.reset_controller() {
            self.process_error(&err);
        }
    }

    /// Reports a device error. The frame log is left untouched.
    pub fn process_error(&mut self, err: &CanBusError) {
        warn!(%err, "CAN bus error");
        self.set_label(Label::Connection, err.to_string());
    }

    pub fn clear_log(&mut self) {
        let change = self.log.clear();
        self.presenter.table_changed(&self.log, change);
    }

    pub fn set_log_capacity(&mut self, capacity: usize) {
        self.log.set_capacity(capacity);
        self.accumulator.set_limit(capacity);
    }

    /// Buffers one received frame and counts it for the bitrate estimate.
    pub fn process_received_frame(&mut self, frame: CanFrame) {
        let error_text = frame.is_error().then(|| match self.device.get() {
            Some(device) => device.interpret_error_frame(&frame),
            None => can::interpret_error_frame(&frame),
        });
        self.accumulator.push(&frame, error_text);

        if self.sampler.record(frame.wire_size(), Instant::now()) {
            debug!("bus activity, sampling started");
            self.session_timer
                .start_with(self.config.activity_interval());
        }
    }

    /// Flush tick: moves buffered rows into the log.
    pub fn on_append_timeout(&mut self) {
        let Some(flush) = self.accumulator.flush_into(&mut self.log) else {
            return;
        };
        self.presenter.table_changed(&self.log, flush.change);
        self.presenter.scroll_to_bottom(&self.log);
        self.set_label(
            Label::FramesReceived,
            format!("{} frames received", flush.received),
        );
    }

    /// Sampling tick: updates session time and bitrate, or goes idle.
    pub fn on_activity_timeout(&mut self) {
        match self.sampler.tick(Instant::now()) {
            Sample::Idle => {
                debug!("no recent traffic, sampling stopped");
                self.session_timer.stop();
                self.set_label(Label::Bitrate, format_bitrate(0.0));
            }
            Sample::Rate {
                elapsed_secs,
                kbit_per_s,
            } => {
                self.set_label(Label::SessionTime, format_session_time(elapsed_secs));
                self.set_label(Label::Bitrate, format_bitrate(kbit_per_s));
            }
        }
    }

    pub fn on_bus_status_timeout(&mut self) {
        match self.device.get().and_then(|d| d.bus_status()) {
            Some(status) => {
                self.set_label(Label::BusStatus, format!("CAN bus status: {}.", status));
            }
            None => {
                self.bus_status_timer.stop();
                self.set_label(Label::BusStatus, NO_BUS_STATUS.into());
            }
        }
    }

    fn set_label(&mut self, label: Label, text: String) {
        self.presenter.set_label(label, text);
    }
}

async fn next_frame<D: CanBusDevice>(device: &mut DeviceHandle<D>) -> Result<CanFrame> {
    match device.get_mut() {
        Some(device) => device.read_frame().await,
        None => std::future::pending().await,
    }
}

fn connection_status(settings: &ConnectSettings) -> String {
    let target = format!(
        "Plugin: {}, connected to {}",
        settings.plugin, settings.interface
    );
    let Some(bus) = settings.effective_configuration() else {
        return target;
    };
    match (bus.bitrate, bus.data_bitrate) {
        (Some(bitrate), Some(data_bitrate)) if bus.can_fd => format!(
            "{} at {} / {} kBit/s",
            target,
            bitrate / 1000,
            data_bitrate / 1000
        ),
        (Some(bitrate), _) => format!("{} at {} kBit/s", target, bitrate / 1000),
        _ => target,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;
    use crate::config::BusConfig;
    use crate::virtual_can::{self, VirtualCan};
    use crate::BusStatus;

    #[derive(Default)]
    struct Recorder {
        labels: HashMap<Label, String>,
        label_updates: usize,
        scrolls: usize,
        changes: Vec<LogChange>,
    }

    impl Recorder {
        fn label(&self, label: Label) -> &str {
            self.labels.get(&label).map(String::as_str).unwrap_or("")
        }
    }

    impl Presenter for Recorder {
        fn set_label(&mut self, label: Label, text: String) {
            self.label_updates += 1;
            self.labels.insert(label, text);
        }

        fn table_changed(&mut self, _log: &FrameLog, change: LogChange) {
            self.changes.push(change);
        }

        fn scroll_to_bottom(&mut self, _log: &FrameLog) {
            self.scrolls += 1;
        }
    }

    fn monitor() -> Monitor<VirtualCan, Recorder> {
        Monitor::new(MonitorConfig::default(), Recorder::default())
    }

    fn settings(interface: &str) -> ConnectSettings {
        ConnectSettings::new(virtual_can::PLUGIN_NAME, interface)
    }

    #[test]
    fn initial_labels_without_a_runtime() {
        let mon = monitor();
        assert_eq!(mon.presenter().label(Label::SessionTime), "0 s, ");
        assert_eq!(mon.presenter().label(Label::Bitrate), "0 kbit/s");
        assert!(!mon.is_connected());
    }

    #[test]
    fn connection_status_texts() {
        let plain = settings("can0");
        assert_eq!(
            connection_status(&plain),
            "Plugin: virtualcan, connected to can0"
        );

        let classic = settings("can0").with_configuration(BusConfig {
            bitrate: Some(500_000),
            ..BusConfig::default()
        });
        assert_eq!(
            connection_status(&classic),
            "Plugin: virtualcan, connected to can0 at 500 kBit/s"
        );

        let fd = settings("can0").with_configuration(BusConfig {
            bitrate: Some(500_000),
            can_fd: true,
            data_bitrate: Some(2_000_000),
            ..BusConfig::default()
        });
        assert_eq!(
            connection_status(&fd),
            "Plugin: virtualcan, connected to can0 at 500 / 2000 kBit/s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_and_disconnect() {
        let mut mon = monitor();
        mon.connect_device(&settings("mon-connect"));
        assert!(mon.is_connected());
        assert!(mon.is_polling_bus_status());
        assert_eq!(
            mon.presenter().label(Label::Connection),
            "Plugin: virtualcan, connected to mon-connect"
        );

        mon.connect_device(&settings("mon-connect"));
        assert_eq!(
            mon.presenter().label(Label::Connection),
            "Already connected, disconnect first"
        );

        mon.disconnect_device();
        assert!(!mon.is_connected());
        assert!(!mon.is_polling_bus_status());
        assert_eq!(mon.presenter().label(Label::Connection), "Disconnected");

        // disconnecting twice is a no-op
        let updates = mon.presenter().label_updates;
        mon.disconnect_device();
        assert_eq!(mon.presenter().label_updates, updates);
    }

    #[tokio::test(start_paused = true)]
    async fn device_creation_failure_is_reported() {
        let mut mon = monitor();
        mon.connect_device(&ConnectSettings::new("nosuchcan", "x"));
        assert!(!mon.is_connected());
        assert!(
            mon.presenter()
                .label(Label::Connection)
                .starts_with("Error creating device 'nosuchcan', reason: '")
        );

        mon.connect_device(&settings(""));
        assert!(
            mon.presenter()
                .label(Label::Connection)
                .starts_with("Connection error: ")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sending_counts_written_frames() {
        let mut mon = monitor();
        mon.send_frame(CanFrame::new(0x1, &[]).unwrap()).await;
        assert_eq!(mon.frames_written(), 0);

        mon.connect_device(&settings("mon-send"));
        mon.send_frame(CanFrame::new(0x1, &[]).unwrap()).await;
        mon.send_frame(CanFrame::new(0x2, &[]).unwrap()).await;
        assert_eq!(mon.frames_written(), 2);
        assert_eq!(
            mon.presenter().label(Label::FramesWritten),
            "2 frames written"
        );

        // reconnecting resets the counter
        mon.disconnect_device();
        mon.connect_device(&settings("mon-send"));
        assert_eq!(mon.frames_written(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn write_errors_keep_the_log() {
        let mut mon = monitor();
        mon.connect_device(&settings("mon-write-err").with_configuration(BusConfig::default()));
        mon.process_received_frame(CanFrame::new(0x5, &[1]).unwrap());
        mon.on_append_timeout();

        mon.send_frame(CanFrame::new_fd(0x1, &[0; 8], false).unwrap())
            .await;
        assert_eq!(mon.frames_written(), 0);
        assert!(
            mon.presenter()
                .label(Label::Connection)
                .starts_with("write error")
        );
        assert_eq!(mon.log().row_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_moves_rows_and_updates_labels() {
        let mut mon = monitor();
        mon.on_append_timeout();
        assert_eq!(mon.presenter().scrolls, 0);

        for n in 0..3 {
            mon.process_received_frame(CanFrame::new(n, &[n as u8]).unwrap());
        }
        assert_eq!(mon.log().row_count(), 0);
        assert_eq!(mon.pending_rows(), 3);

        mon.on_append_timeout();
        assert_eq!(mon.log().row_count(), 3);
        assert_eq!(mon.pending_rows(), 0);
        assert_eq!(mon.presenter().scrolls, 1);
        assert_eq!(
            mon.presenter().changes,
            [LogChange::Appended { removed: 0, inserted: 3 }]
        );
        assert_eq!(
            mon.presenter().label(Label::FramesReceived),
            "3 frames received"
        );

        mon.clear_log();
        assert_eq!(mon.log().row_count(), 0);
        assert_eq!(mon.presenter().changes.last(), Some(&LogChange::Reset));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_bounds_log_on_flush() {
        let mut mon = monitor();
        for n in 0..1200u32 {
            mon.process_received_frame(CanFrame::new(n & 0x7FF, &[0xAA, 0x55]).unwrap());
        }
        mon.on_append_timeout();
        assert_eq!(mon.log().row_count(), 1000);
        assert_eq!(mon.log().field(0, 0).unwrap(), "201");
        assert_eq!(mon.log().field(999, 0).unwrap(), "1200");
        assert_eq!(
            mon.presenter().label(Label::FramesReceived),
            "1200 frames received"
        );

        mon.set_log_capacity(10);
        mon.process_received_frame(CanFrame::new(0x1, &[]).unwrap());
        mon.on_append_timeout();
        assert_eq!(mon.log().row_count(), 10);
        assert_eq!(mon.log().field(9, 0).unwrap(), "1201");
    }

    #[tokio::test(start_paused = true)]
    async fn error_frames_use_device_interpretation() {
        let mut mon = monitor();
        mon.connect_device(&settings("mon-errframe"));
        mon.process_received_frame(CanFrame::new_error(0x40, &[]).unwrap());
        mon.on_append_timeout();
        assert_eq!(mon.log().field(0, 5).unwrap(), "Bus off");
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_goes_idle_without_traffic() {
        let mut mon = monitor();
        assert!(!mon.is_sampling());

        for _ in 0..125 {
            mon.process_received_frame(CanFrame::new(0x10, &[0; 8]).unwrap());
        }
        assert!(mon.is_sampling());

        tokio::time::advance(Duration::from_secs(1)).await;
        mon.on_activity_timeout();
        assert_eq!(mon.presenter().label(Label::Bitrate), "16 kbit/s");
        assert_eq!(mon.presenter().label(Label::SessionTime), "1 s, ");
        assert!(mon.is_sampling());

        tokio::time::advance(Duration::from_secs(1)).await;
        mon.on_activity_timeout();
        assert_eq!(mon.presenter().label(Label::Bitrate), "0 kbit/s");
        assert!(!mon.is_sampling());
    }

    #[tokio::test(start_paused = true)]
    async fn bus_status_polling() {
        let mut mon = monitor();
        mon.on_bus_status_timeout();
        assert_eq!(mon.presenter().label(Label::BusStatus), NO_BUS_STATUS);

        mon.connect_device(&settings("mon-status"));
        mon.on_bus_status_timeout();
        assert_eq!(
            mon.presenter().label(Label::BusStatus),
            "CAN bus status: Good."
        );

        if let Some(dev) = mon.device_mut() {
            dev.set_bus_status(BusStatus::BusOff);
        }
        mon.on_bus_status_timeout();
        assert_eq!(
            mon.presenter().label(Label::BusStatus),
            "CAN bus status: Bus Off."
        );

        let _ = mon.handle_command(Command::ResetController).await;
        mon.on_bus_status_timeout();
        assert_eq!(
            mon.presenter().label(Label::BusStatus),
            "CAN bus status: Good."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quit_breaks_the_loop() {
        let mut mon = monitor();
        assert!(mon.handle_command(Command::ClearLog).await.is_continue());
        assert!(mon.handle_command(Command::Quit).await.is_break());
    }

    /// Connects fine, then fails every read.
    struct BrokenController;

    impl CanBusDevice for BrokenController {
        fn open(_settings: &ConnectSettings) -> Result<Self> {
            Ok(Self)
        }

        async fn read_frame(&mut self) -> Result<CanFrame> {
            Err(CanBusError::Read(std::io::Error::other("controller gone")))
        }

        async fn write_frame(&mut self, _frame: CanFrame) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_stays_on_the_connection_label() {
        let mut mon: Monitor<BrokenController, Recorder> =
            Monitor::new(MonitorConfig::default(), Recorder::default());
        let (tx, rx) = mpsc::channel(4);

        let driver = async {
            tx.send(Command::Connect(ConnectSettings::new("broken", "can9")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(mon.run(rx), driver);

        assert!(!mon.is_connected());
        assert!(!mon.is_polling_bus_status());
        assert_eq!(
            mon.presenter().label(Label::Connection),
            "read error: controller gone"
        );
    }
}
