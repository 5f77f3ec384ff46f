//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Alert sinks receiving tank threshold crossings."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
//! Threshold alerts leave the simulation through an [`AlertSink`]. Sinks are
//! called synchronously from the data tick, so anything that must run on a
//! particular context should forward through a channel such as
//! [`ChannelAlertSink`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::tank::TankIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// One delivered threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub tank_id: u32,
    pub tank_name: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

pub trait AlertSink: Send + Sync {
    fn on_alert(&self, tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>);
}

impl<S: AlertSink + ?Sized> AlertSink for Arc<S> {
    fn on_alert(&self, tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>) {
        (**self).on_alert(tank, severity, timestamp)
    }
}

/// Emits every alert as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn on_alert(&self, tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>) {
        match severity {
            Severity::Warning => warn!(
                tank_id = tank.id,
                tank = %tank.name,
                %severity,
                at = %timestamp.to_rfc3339(),
                "tank reached warning level"
            ),
            Severity::Critical => error!(
                tank_id = tank.id,
                tank = %tank.name,
                %severity,
                at = %timestamp.to_rfc3339(),
                "tank reached critical level"
            ),
        }
    }
}

/// Forwards alerts to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn on_alert(&self, tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>) {
        let alert = Alert {
            tank_id: tank.id,
            tank_name: tank.name.clone(),
            severity,
            timestamp,
        };
        if self.tx.send(alert).is_err() {
            warn!(tank_id = tank.id, "alert receiver dropped; alert discarded");
        }
    }
}

/// Delivers each alert to every inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutAlertSink {
    fn on_alert(&self, tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>) {
        for sink in &self.sinks {
            sink.on_alert(tank, severity, timestamp);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogColor {
    Yellow,
    Red,
}

impl From<Severity> for LogColor {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Warning => LogColor::Yellow,
            Severity::Critical => LogColor::Red,
        }
    }
}

/// A rendered alert line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub color: LogColor,
    pub text: String,
}

impl LogEntry {
    pub fn render(tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>) -> Self {
        let local = timestamp.with_timezone(&Local);
        let text = match severity {
            Severity::Warning => format!(
                "{} tank {}: warning level reached, requesting fuel delivery",
                local.format("%H:%M:%S"),
                tank.name
            ),
            Severity::Critical => format!(
                "{} tank {}: critical level reached, requesting urgent fuel delivery",
                local.format("%H:%M:%S"),
                tank.name
            ),
        };
        Self {
            color: severity.into(),
            text,
        }
    }
}

pub const DEFAULT_LOG_CAPACITY: usize = 256;

/// Bounded, colour-coded alert history. The oldest entry is evicted once
/// `capacity` is reached.
#[derive(Debug)]
pub struct AlertLog {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl AlertLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AlertSink for AlertLog {
    fn on_alert(&self, tank: &TankIdentity, severity: Severity, timestamp: DateTime<Utc>) {
        let entry = LogEntry::render(tank, severity, timestamp);
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tank(id: u32) -> TankIdentity {
        TankIdentity {
            id,
            name: id.to_string(),
        }
    }

    #[test]
    fn log_colours_follow_severity() {
        let log = AlertLog::default();
        log.on_alert(&tank(1), Severity::Warning, Utc::now());
        log.on_alert(&tank(2), Severity::Critical, Utc::now());
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].color, LogColor::Yellow);
        assert!(entries[0].text.contains("tank 1: warning"));
        assert_eq!(entries[1].color, LogColor::Red);
        assert!(entries[1].text.contains("tank 2: critical"));
    }

    #[test]
    fn log_evicts_oldest_entry() {
        let log = AlertLog::with_capacity(2);
        for id in 1..=3 {
            log.on_alert(&tank(id), Severity::Warning, Utc::now());
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].text.contains("tank 2"));
        assert!(entries[1].text.contains("tank 3"));
    }

    #[test]
    fn channel_sink_forwards_alerts() {
        let (sink, mut rx) = ChannelAlertSink::new();
        let at = Utc::now();
        sink.on_alert(&tank(4), Severity::Critical, at);
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.tank_id, 4);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.timestamp, at);
    }

    #[test]
    fn channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelAlertSink::new();
        drop(rx);
        sink.on_alert(&tank(1), Severity::Warning, Utc::now());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let first = Arc::new(AlertLog::default());
        let second = Arc::new(AlertLog::default());
        let fanout = FanoutAlertSink::new()
            .with(first.clone())
            .with(second.clone());
        fanout.on_alert(&tank(1), Severity::Warning, Utc::now());
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }
}
