//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Fuel tank levels and edge-triggered threshold tracking."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
use std::fmt;

use tms_common::config::{TankConfig, ThresholdConfig};

/// Stable numeric tank identity; measurement records address tanks by it.
pub type TankId = u32;

/// Identity handed to threshold subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TankIdentity {
    pub id: TankId,
    pub name: String,
}

impl fmt::Display for TankIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Callback invoked when a threshold is crossed downward.
pub type ThresholdListener = Box<dyn Fn(&TankIdentity) + Send + Sync>;

/// Which thresholds a single `set_current` call newly crossed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crossings {
    pub warning: bool,
    pub critical: bool,
}

impl Crossings {
    pub fn any(&self) -> bool {
        self.warning || self.critical
    }
}

/// A single tank. `min <= critical <= warning <= max` is intended but not
/// enforced; threshold drift may break it.
pub struct Tank {
    identity: TankIdentity,
    min: f64,
    max: f64,
    current: f64,
    warning: f64,
    critical: f64,
    warning_reached: bool,
    critical_reached: bool,
    warning_listeners: Vec<ThresholdListener>,
    critical_listeners: Vec<ThresholdListener>,
}

impl fmt::Debug for Tank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tank")
            .field("identity", &self.identity)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("current", &self.current)
            .field("warning", &self.warning)
            .field("critical", &self.critical)
            .field("warning_reached", &self.warning_reached)
            .field("critical_reached", &self.critical_reached)
            .field("warning_listeners", &self.warning_listeners.len())
            .field("critical_listeners", &self.critical_listeners.len())
            .finish()
    }
}

impl Tank {
    /// New tank at `min` with both thresholds at `min` and no flags raised.
    pub fn new(id: TankId, name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            identity: TankIdentity {
                id,
                name: name.into(),
            },
            min,
            max,
            current: min,
            warning: min,
            critical: min,
            warning_reached: false,
            critical_reached: false,
            warning_listeners: Vec::new(),
            critical_listeners: Vec::new(),
        }
    }

    /// Build a tank with thresholds placed at the configured ratios of `max`.
    pub fn from_config(config: &TankConfig, thresholds: &ThresholdConfig) -> Self {
        let mut tank = Self::new(config.id, config.display_name(), config.min, config.max);
        tank.critical = config.max * thresholds.initial_critical_ratio;
        tank.warning = config.max * thresholds.initial_warning_ratio;
        tank
    }

    pub fn on_warning<F>(&mut self, listener: F)
    where
        F: Fn(&TankIdentity) + Send + Sync + 'static,
    {
        self.warning_listeners.push(Box::new(listener));
    }

    pub fn on_critical<F>(&mut self, listener: F)
    where
        F: Fn(&TankIdentity) + Send + Sync + 'static,
    {
        self.critical_listeners.push(Box::new(listener));
    }

    /// Store a new level and re-evaluate both thresholds.
    ///
    /// Subscribers are notified only when a flag flips from false to true;
    /// dropping back above a threshold re-arms it silently.
    pub fn set_current(&mut self, value: f64) -> Crossings {
        self.current = value;
        let crossings = Crossings {
            warning: raise(&mut self.warning_reached, value <= self.warning),
            critical: raise(&mut self.critical_reached, value <= self.critical),
        };
        if crossings.warning {
            for listener in &self.warning_listeners {
                listener(&self.identity);
            }
        }
        if crossings.critical {
            for listener in &self.critical_listeners {
                listener(&self.identity);
            }
        }
        crossings
    }

    /// Thresholds take effect on the next `set_current`.
    pub fn set_warning(&mut self, value: f64) {
        self.warning = value;
    }

    pub fn set_critical(&mut self, value: f64) {
        self.critical = value;
    }

    pub fn identity(&self) -> &TankIdentity {
        &self.identity
    }

    pub fn id(&self) -> TankId {
        self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn warning(&self) -> f64 {
        self.warning
    }

    pub fn critical(&self) -> f64 {
        self.critical
    }

    pub fn warning_reached(&self) -> bool {
        self.warning_reached
    }

    pub fn critical_reached(&self) -> bool {
        self.critical_reached
    }
}

fn raise(flag: &mut bool, reached: bool) -> bool {
    let rising = !*flag && reached;
    *flag = reached;
    rising
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn tank_with_counters() -> (Tank, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let mut tank = Tank::new(1, "1", 0.0, 1000.0);
        tank.set_critical(100.0);
        tank.set_warning(300.0);
        let warnings = Arc::new(AtomicUsize::new(0));
        let criticals = Arc::new(AtomicUsize::new(0));
        let w = warnings.clone();
        tank.on_warning(move |_| {
            w.fetch_add(1, Ordering::SeqCst);
        });
        let c = criticals.clone();
        tank.on_critical(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (tank, warnings, criticals)
    }

    #[test]
    fn from_config_places_thresholds_by_ratio() {
        let config = TankConfig {
            id: 2,
            name: String::new(),
            min: 0.0,
            max: 20_000.0,
        };
        let tank = Tank::from_config(&config, &ThresholdConfig::default());
        assert_eq!(tank.name(), "2");
        assert_eq!(tank.critical(), 2_000.0);
        assert_eq!(tank.warning(), 6_000.0);
        assert!(!tank.warning_reached());
    }

    #[test]
    fn warning_fires_once_while_below() {
        let (mut tank, warnings, criticals) = tank_with_counters();
        assert!(tank.set_current(250.0).warning);
        assert!(!tank.set_current(200.0).warning);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
        assert_eq!(criticals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rearms_after_recovering() {
        let (mut tank, warnings, criticals) = tank_with_counters();
        tank.set_current(50.0);
        tank.set_current(800.0);
        assert!(!tank.warning_reached());
        assert!(!tank.critical_reached());
        tank.set_current(90.0);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
        assert_eq!(criticals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn boundary_value_counts_as_reached() {
        let (mut tank, _, _) = tank_with_counters();
        let crossings = tank.set_current(100.0);
        assert!(crossings.warning && crossings.critical);
    }

    #[test]
    fn listeners_receive_identity() {
        let mut tank = Tank::new(3, "north", 0.0, 10.0);
        tank.set_warning(5.0);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        tank.on_warning(move |identity| sink.lock().push(identity.clone()));
        tank.set_current(1.0);
        assert_eq!(
            seen.lock().as_slice(),
            &[TankIdentity {
                id: 3,
                name: "north".into()
            }]
        );
    }

    #[test]
    fn threshold_change_is_evaluated_on_next_level() {
        let (mut tank, warnings, _) = tank_with_counters();
        tank.set_current(400.0);
        tank.set_warning(500.0);
        assert!(!tank.warning_reached());
        tank.set_current(400.0);
        assert!(tank.warning_reached());
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn flags_track_last_level_and_events_count_rising_edges(
            levels in proptest::collection::vec(0.0f64..1000.0, 1..40),
        ) {
            let (mut tank, warnings, criticals) = tank_with_counters();
            let mut expected_warnings = 0;
            let mut expected_criticals = 0;
            let mut was_warning = false;
            let mut was_critical = false;
            for level in levels {
                tank.set_current(level);
                prop_assert_eq!(tank.warning_reached(), level <= tank.warning());
                prop_assert_eq!(tank.critical_reached(), level <= tank.critical());
                if !was_warning && tank.warning_reached() {
                    expected_warnings += 1;
                }
                if !was_critical && tank.critical_reached() {
                    expected_criticals += 1;
                }
                was_warning = tank.warning_reached();
                was_critical = tank.critical_reached();
            }
            prop_assert_eq!(warnings.load(Ordering::SeqCst), expected_warnings);
            prop_assert_eq!(criticals.load(Ordering::SeqCst), expected_criticals);
        }
    }
}
