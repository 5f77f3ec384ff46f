//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Tick handler tying dataset playback to tank mutation."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::sync::Arc;

use chrono::Utc;
use tms_common::config::{AppConfig, ClockConfig, ThresholdConfig};
use tracing::{debug, info};

use crate::alerts::{AlertSink, Severity};
use crate::error::Result;
use crate::feed::{Measurement, MeasurementFeed};
use crate::tank::{Crossings, Tank, TankId};

/// Outcome of a single [`SimulationClock::tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// 1-based tick number.
    pub tick: u64,
    /// Synthetic value applied to the thresholds, when this tick recomputed.
    pub recomputed: Option<f64>,
    pub measurement: Measurement,
    /// Tank that received the measurement; `None` for unknown ids.
    pub applied_to: Option<TankId>,
    pub crossings: Crossings,
}

/// Periodic step over the tank fleet.
///
/// Every tick reads one measurement and applies it to the matching tank.
/// Every `recompute_every` ticks the thresholds of all tanks are shifted by
/// the next synthetic value first.
#[derive(Debug)]
pub struct SimulationClock<R = BufReader<File>> {
    feed: MeasurementFeed<R>,
    tanks: Vec<Tank>,
    counter: u32,
    recompute_every: u32,
    critical_threshold: f64,
    ticks: u64,
}

impl SimulationClock<BufReader<File>> {
    /// Open the datasets and build the configured fleet. Missing or
    /// degenerate datasets fail here rather than on the first tick.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let feed = MeasurementFeed::open(&config.datasets, config.synthetic.clone())?;
        let tanks = config
            .fleet
            .iter()
            .map(|tank| Tank::from_config(tank, &config.thresholds))
            .collect();
        Ok(Self::new(feed, tanks, &config.clock, &config.thresholds))
    }
}

impl<R: BufRead + Seek> SimulationClock<R> {
    pub fn new(
        feed: MeasurementFeed<R>,
        tanks: Vec<Tank>,
        clock: &ClockConfig,
        thresholds: &ThresholdConfig,
    ) -> Self {
        Self {
            feed,
            tanks,
            counter: clock.counter_start(),
            recompute_every: clock.recompute_every.max(1),
            critical_threshold: thresholds.critical_threshold,
            ticks: 0,
        }
    }

    /// Route every tank's threshold crossings to `sink`.
    pub fn subscribe(&mut self, sink: Arc<dyn AlertSink>) {
        for tank in &mut self.tanks {
            let warning = sink.clone();
            tank.on_warning(move |identity| {
                warning.on_alert(identity, Severity::Warning, Utc::now())
            });
            let critical = sink.clone();
            tank.on_critical(move |identity| {
                critical.on_alert(identity, Severity::Critical, Utc::now())
            });
        }
    }

    /// Run one step.
    ///
    /// A malformed measurement record aborts the tick with
    /// [`SimError::DataFormat`](crate::SimError::DataFormat); the counter and
    /// any recompute done earlier in the tick are kept.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.ticks += 1;
        self.counter += 1;
        let recomputed = if self.counter >= self.recompute_every {
            self.counter = 0;
            Some(self.recompute_thresholds())
        } else {
            None
        };

        let measurement = self.feed.next_measurement()?;
        let (applied_to, crossings) = match self.tank_mut(measurement.tank_id) {
            Some(tank) => (Some(tank.id()), tank.set_current(measurement.value)),
            None => {
                debug!(
                    tank_id = measurement.tank_id,
                    tick = self.ticks,
                    "measurement for unknown tank ignored"
                );
                (None, Crossings::default())
            }
        };

        Ok(TickReport {
            tick: self.ticks,
            recomputed,
            measurement,
            applied_to,
            crossings,
        })
    }

    /// Shift every tank's thresholds by the next synthetic value.
    ///
    /// `warning` is rebuilt from the new `critical` and is not clamped, so it
    /// may end up below `critical` or above `max`.
    pub fn recompute_thresholds(&mut self) -> f64 {
        let sign = if self.feed.last_value() >= self.critical_threshold {
            1.0
        } else {
            -1.0
        };
        let value = self.feed.next_synthetic_value();
        for tank in &mut self.tanks {
            let critical = tank.critical() + sign * value;
            tank.set_critical(critical);
            tank.set_warning(critical + value * tank.max());
        }
        info!(
            tick = self.ticks,
            value,
            direction = sign,
            "tank thresholds recomputed"
        );
        value
    }

    pub fn tanks(&self) -> &[Tank] {
        &self.tanks
    }

    pub fn tank(&self, id: TankId) -> Option<&Tank> {
        self.tanks.iter().find(|tank| tank.id() == id)
    }

    fn tank_mut(&mut self, id: TankId) -> Option<&mut Tank> {
        self.tanks.iter_mut().find(|tank| tank.id() == id)
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn feed(&self) -> &MeasurementFeed<R> {
        &self.feed
    }

    /// Release the measurement stream.
    pub fn close(self) {
        debug!(ticks = self.ticks, "simulation clock closed");
        self.feed.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertLog;
    use crate::feed::MeasurementStream;
    use std::io::Cursor;
    use tms_common::config::SyntheticConfig;

    fn clock_with(records: &str, tanks: Vec<Tank>) -> SimulationClock<Cursor<Vec<u8>>> {
        let stream = MeasurementStream::from_reader("mem", Cursor::new(records.as_bytes().to_vec()));
        let feed = MeasurementFeed::from_parts(
            vec![0.1, 0.2],
            vec![1.0, 0.5],
            stream,
            SyntheticConfig::default(),
        )
        .unwrap();
        SimulationClock::new(
            feed,
            tanks,
            &ClockConfig::default(),
            &ThresholdConfig::default(),
        )
    }

    fn reference_tank(id: TankId, max: f64) -> Tank {
        let mut tank = Tank::new(id, id.to_string(), 0.0, max);
        tank.set_critical(max * 0.1);
        tank.set_warning(max * 0.3);
        tank
    }

    #[test]
    fn fifth_tick_recomputes_exactly_once() {
        let mut clock = clock_with("1,\"5000\"\n", vec![reference_tank(1, 10_000.0)]);
        assert_eq!(clock.counter(), 95);
        let recomputes = (0..5)
            .map(|_| clock.tick().unwrap())
            .filter(|report| report.recomputed.is_some())
            .count();
        assert_eq!(recomputes, 1);
        assert_eq!(clock.counter(), 0);
        let later = (0..99)
            .map(|_| clock.tick().unwrap())
            .filter(|report| report.recomputed.is_some())
            .count();
        assert_eq!(later, 0);
        assert!(clock.tick().unwrap().recomputed.is_some());
    }

    #[test]
    fn first_recompute_lowers_critical_and_rebuilds_warning() {
        let mut clock = clock_with("1,\"5000\"\n", vec![reference_tank(1, 10_000.0)]);
        let value = clock.recompute_thresholds();
        assert!((value - 0.115).abs() < 1e-12);
        let tank = clock.tank(1).unwrap();
        assert!((tank.critical() - (1000.0 - 0.115)).abs() < 1e-9);
        assert!((tank.warning() - (tank.critical() + 0.115 * 10_000.0)).abs() < 1e-9);
    }

    #[test]
    fn direction_follows_previous_synthetic_value() {
        let mut clock = clock_with("1,\"5000\"\n", vec![reference_tank(1, 10_000.0)]);
        clock.recompute_thresholds();
        let before = clock.tank(1).unwrap().critical();
        // 0.5 * (0.05 * 0.2) * 3.0 = 0.015, shifted to 0.115; still below 0.15
        let value = clock.recompute_thresholds();
        let after = clock.tank(1).unwrap().critical();
        assert!((before - value - after).abs() < 1e-9);
    }

    #[test]
    fn recompute_leaves_thresholds_unclamped() {
        // Known non-invariant: thresholds may drift outside [min, max].
        let mut tank = Tank::new(1, "1", 0.0, 1.0);
        tank.set_critical(5.0);
        tank.set_warning(6.0);
        let mut clock = clock_with("1,\"0\"\n", vec![tank]);
        clock.recompute_thresholds();
        let tank = clock.tank(1).unwrap();
        assert!(tank.warning() > tank.max());
        assert!(tank.critical() > tank.max());
    }

    #[test]
    fn measurement_applies_to_matching_tank_and_alerts() {
        let records = "2,\"1500,5\"\n9,\"1\"\n";
        let mut clock = clock_with(
            records,
            vec![reference_tank(1, 10_000.0), reference_tank(2, 20_000.0)],
        );
        let log = Arc::new(AlertLog::default());
        clock.subscribe(log.clone());

        let report = clock.tick().unwrap();
        assert_eq!(report.applied_to, Some(2));
        assert!(report.crossings.critical);
        assert_eq!(clock.tank(2).unwrap().current(), 1500.5);
        assert_eq!(log.len(), 2);

        let report = clock.tick().unwrap();
        assert_eq!(report.applied_to, None);
        assert!(!report.crossings.any());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn malformed_record_aborts_tick() {
        let mut clock = clock_with("1,abc\n", vec![reference_tank(1, 10_000.0)]);
        let err = clock.tick().unwrap_err();
        assert!(err.is_data_format());
        assert_eq!(clock.ticks(), 1);
    }
}
