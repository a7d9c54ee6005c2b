//! Proximity log source and presence observer
//!
//! The source is an unbounded stream of text records from the OS Bluetooth
//! log. `PresenceObserver` filters it down to the tracked device, publishes
//! the time of every matching record as a sighting, and emits a
//! `ProximityTick` only when the signal quality changes. The source is
//! reopened whenever it terminates and on a fixed schedule; the last emitted
//! quality survives every restart but not a change of date.

use crate::domain::types::{DeviceId, ProximityTick};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

static RSSI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RSSI (-?\d+)").expect("constant regex pattern is valid"));

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} has no stdout")]
    NoStdout(String),
}

/// One opened run of the raw record source
#[async_trait]
pub trait RecordStream: Send {
    /// Next raw record, `None` once the source has terminated
    async fn next_record(&mut self) -> Option<String>;
}

/// Restartable raw record source
#[async_trait]
pub trait ProximitySource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RecordStream>, SourceError>;
}

/// Spawns the configured log command and reads its stdout line by line
pub struct CommandSource {
    command: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(config: &Config) -> Self {
        Self { command: config.presence_command().to_string(), args: config.presence_args().to_vec() }
    }
}

struct CommandStream {
    // Held so the process is killed when the stream is dropped
    _child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

#[async_trait]
impl RecordStream for CommandStream {
    async fn next_record(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "presence_source_read_error");
                None
            }
        }
    }
}

#[async_trait]
impl ProximitySource for CommandSource {
    async fn open(&self) -> Result<Box<dyn RecordStream>, SourceError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn { command: self.command.clone(), source })?;

        let stdout = child.stdout.take().ok_or_else(|| SourceError::NoStdout(self.command.clone()))?;

        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(command = %command, line = %line, "presence_source_stderr");
                }
            });
        }

        debug!(command = %self.command, pid = ?child.id(), "presence_source_spawned");
        Ok(Box::new(CommandStream { _child: child, lines: BufReader::new(stdout).lines() }))
    }
}

/// Signal quality carried by a raw record, if any
pub fn extract_quality(record: &str) -> Option<i32> {
    RSSI_PATTERN.captures(record).and_then(|caps| caps[1].parse().ok())
}

/// Turns raw records into de-duplicated presence ticks
pub struct PresenceObserver {
    source: Arc<dyn ProximitySource>,
    clock: Arc<dyn Clock>,
    device_id: DeviceId,
    restart_interval: Option<Duration>,
    restart_delay: Duration,
    metrics: Arc<Metrics>,
    /// Date and quality of the last emitted tick
    last_emitted: Option<(NaiveDate, Option<i32>)>,
    /// Time of the last matching record
    last_seen: Option<NaiveDateTime>,
}

impl PresenceObserver {
    pub fn new(
        config: &Config,
        source: Arc<dyn ProximitySource>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            clock,
            device_id: DeviceId(config.target_id().to_string()),
            restart_interval: config.presence_restart_interval(),
            restart_delay: config.presence_restart_delay(),
            metrics,
            last_emitted: None,
            last_seen: None,
        }
    }

    /// Process one raw record, returning a tick when the quality changed
    pub fn observe(&mut self, record: &str) -> Option<ProximityTick> {
        let matched = record.contains(self.device_id.0.as_str());
        self.metrics.record_raw_record(matched);
        if !matched {
            return None;
        }

        let now = self.clock.now();
        self.last_seen = Some(now);

        // The first reading of a new day is always emitted
        let quality = extract_quality(record);
        let key = (now.date(), quality);
        if self.last_emitted == Some(key) {
            trace!(quality = ?quality, "tick_suppressed");
            return None;
        }
        self.last_emitted = Some(key);
        self.metrics.record_tick();

        Some(ProximityTick {
            observed_at: now,
            device_id: self.device_id.clone(),
            signal_quality: quality,
        })
    }

    /// Time of the last record that mentioned the tracked device
    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.last_seen
    }

    /// Run until shutdown, reopening the source whenever it ends
    pub async fn run(
        mut self,
        tick_tx: mpsc::Sender<ProximityTick>,
        seen_tx: watch::Sender<Option<NaiveDateTime>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(device = %self.device_id, "presence_observer_started");

        loop {
            let mut stream = match self.source.open().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "presence_source_open_failed");
                    if wait_or_shutdown(self.restart_delay, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };
            info!("presence_source_opened");

            // One-shot deadline, re-armed each time the source is opened
            let restart_at = self.restart_interval.map(|interval| Instant::now() + interval);

            let reason = loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("presence_observer_shutdown");
                            return;
                        }
                    }
                    record = stream.next_record() => match record {
                        Some(line) => {
                            let tick = self.observe(&line);
                            let last_seen = self.last_seen;
                            seen_tx.send_if_modified(|seen| {
                                let modified = *seen != last_seen;
                                *seen = last_seen;
                                modified
                            });
                            if let Some(tick) = tick {
                                debug!(quality = ?tick.signal_quality, "tick_emitted");
                                if tick_tx.send(tick).await.is_err() {
                                    info!("presence_observer_receiver_closed");
                                    return;
                                }
                            }
                        }
                        None => break "terminated",
                    },
                    _ = restart_deadline(restart_at) => break "scheduled",
                }
            };

            drop(stream);
            self.metrics.record_source_restart();
            info!(reason = reason, delay_ms = %self.restart_delay.as_millis(), "presence_source_restarting");

            if wait_or_shutdown(self.restart_delay, &mut shutdown).await {
                return;
            }
        }
    }
}

async fn restart_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Sleep for `delay`; true if shutdown was requested meanwhile
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{Script, ScriptedSource};
    use super::*;
    use crate::infra::clock::FakeClock;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    const DEVICE: &str = "60:06:E3:97:04:E5";

    fn record(quality: Option<i32>) -> String {
        match quality {
            Some(q) => format!("nearbyd: Device {DEVICE} RSSI {q} dBm"),
            None => format!("nearbyd: Device {DEVICE} lost"),
        }
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn observer(source: Arc<ScriptedSource>) -> (PresenceObserver, Arc<Metrics>) {
        let clock = FakeClock::new(at(8, 15));
        let metrics = Arc::new(Metrics::new());
        let observer = PresenceObserver::new(&Config::default(), source, Arc::new(clock), metrics.clone());
        (observer, metrics)
    }

    #[test]
    fn test_extract_quality() {
        assert_eq!(extract_quality("addr RSSI -67 ch 37"), Some(-67));
        assert_eq!(extract_quality("addr RSSI 4"), Some(4));
        assert_eq!(extract_quality("addr rssi -67"), None);
        assert_eq!(extract_quality("no signal here"), None);
    }

    #[test]
    fn test_observe_filters_other_devices() {
        let (mut observer, metrics) = observer(Arc::new(ScriptedSource::default()));
        assert!(observer.observe("Device AA:BB:CC:DD:EE:FF RSSI -40").is_none());

        let tick = observer.observe(&record(Some(-55))).unwrap();
        assert_eq!(tick.signal_quality, Some(-55));
        assert_eq!(tick.device_id.0, DEVICE);

        let report = metrics.report();
        assert_eq!(report.records_total, 2);
        assert_eq!(report.records_matched, 1);
        assert_eq!(report.ticks_emitted, 1);
    }

    #[test]
    fn test_observe_passes_transitions_to_and_from_none() {
        let (mut observer, _) = observer(Arc::new(ScriptedSource::default()));
        let emitted: Vec<Option<i32>> = [Some(-60), Some(-60), None, None, Some(-60)]
            .into_iter()
            .filter_map(|q| observer.observe(&record(q)))
            .map(|t| t.signal_quality)
            .collect();
        assert_eq!(emitted, vec![Some(-60), None, Some(-60)]);
    }

    #[test]
    fn test_first_record_without_quality_is_emitted() {
        let (mut observer, _) = observer(Arc::new(ScriptedSource::default()));
        let tick = observer.observe(&record(None)).unwrap();
        assert_eq!(tick.signal_quality, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_termination_and_keeps_dedup_state() {
        let first = record(Some(-50));
        let second = record(Some(-62));
        let source = Arc::new(ScriptedSource::new(vec![
            Script::ends(&[&first]),
            Script::hangs(&[&first, &second]),
        ]));
        let (observer, metrics) = observer(source.clone());
        let (tick_tx, mut tick_rx) = mpsc::channel(16);
        let (seen_tx, seen_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(observer.run(tick_tx, seen_tx, shutdown_rx));

        assert_eq!(tick_rx.recv().await.unwrap().signal_quality, Some(-50));
        // The repeated -50 after the restart is suppressed
        assert_eq!(tick_rx.recv().await.unwrap().signal_quality, Some(-62));
        assert_eq!(source.opens(), 2);
        assert_eq!(metrics.report().source_restarts, 1);
        assert_eq!(*seen_rx.borrow(), Some(at(8, 15)));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_restart_fires_while_source_is_live() {
        let source = Arc::new(ScriptedSource::new(vec![
            Script::hangs(&[&record(Some(-50))]),
            Script::hangs(&[&record(Some(-71))]),
        ]));
        let (observer, metrics) = observer(source.clone());
        let (tick_tx, mut tick_rx) = mpsc::channel(16);
        let (seen_tx, _seen_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let start = Instant::now();
        let handle = tokio::spawn(observer.run(tick_tx, seen_tx, shutdown_rx));

        assert_eq!(tick_rx.recv().await.unwrap().signal_quality, Some(-50));
        assert_eq!(tick_rx.recv().await.unwrap().signal_quality, Some(-71));
        // One hour restart interval plus the two second restart delay
        assert_eq!(start.elapsed(), Duration::from_secs(3602));
        assert_eq!(metrics.report().source_restarts, 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_receiver_dropped() {
        let source = Arc::new(ScriptedSource::new(vec![Script::hangs(&[&record(Some(-50))])]));
        let (observer, _) = observer(source);
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (seen_tx, _seen_rx) = watch::channel(None);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(tick_rx);
        observer.run(tick_tx, seen_tx, shutdown_rx).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_signal_still_publishes_sightings() {
        let steady = record(Some(-55));
        let source = Arc::new(ScriptedSource::new(vec![Script::hangs(&[&steady])]));
        let clock = FakeClock::new(at(17, 50));
        let observer =
            PresenceObserver::new(&Config::default(), source, Arc::new(clock.clone()), Arc::new(Metrics::new()));
        let (tick_tx, mut tick_rx) = mpsc::channel(16);
        let (seen_tx, mut seen_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(observer.run(tick_tx, seen_tx, shutdown_rx));

        assert_eq!(tick_rx.recv().await.unwrap().observed_at, at(17, 50));
        seen_rx.changed().await.unwrap();
        assert_eq!(*seen_rx.borrow_and_update(), Some(at(17, 50)));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_every_matching_record_is_a_sighting() {
        let clock = FakeClock::new(at(17, 50));
        let mut observer = PresenceObserver::new(
            &Config::default(),
            Arc::new(ScriptedSource::default()),
            Arc::new(clock.clone()),
            Arc::new(Metrics::new()),
        );

        assert!(observer.observe(&record(Some(-55))).is_some());
        clock.set(at(18, 19));
        // Same quality: no tick, but the device was still seen
        assert!(observer.observe(&record(Some(-55))).is_none());
        assert_eq!(observer.last_seen(), Some(at(18, 19)));

        clock.set(at(18, 25));
        assert!(observer.observe("Device AA:BB:CC:DD:EE:FF RSSI -40").is_none());
        assert_eq!(observer.last_seen(), Some(at(18, 19)));
    }

    #[test]
    fn test_new_day_emits_repeated_quality() {
        let clock = FakeClock::new(at(23, 59));
        let mut observer = PresenceObserver::new(
            &Config::default(),
            Arc::new(ScriptedSource::default()),
            Arc::new(clock.clone()),
            Arc::new(Metrics::new()),
        );

        assert!(observer.observe(&record(Some(-60))).is_some());
        assert!(observer.observe(&record(Some(-60))).is_none());

        clock.set(at(23, 59) + chrono::Duration::minutes(2));
        let tick = observer.observe(&record(Some(-60))).unwrap();
        assert_eq!(tick.observed_at.date(), at(0, 0).date().succ_opt().unwrap());
    }

    proptest! {
        /// Exactly one tick per maximal run of equal qualities
        #[test]
        fn prop_one_tick_per_run(qualities in prop::collection::vec(prop::option::of(-3i32..=0), 0..64)) {
            let (mut observer, _) = observer(Arc::new(ScriptedSource::default()));
            let emitted: Vec<Option<i32>> = qualities
                .iter()
                .filter_map(|q| observer.observe(&record(*q)))
                .map(|t| t.signal_quality)
                .collect();

            let mut runs = qualities.clone();
            runs.dedup();
            prop_assert_eq!(emitted, runs);
        }
    }
}
