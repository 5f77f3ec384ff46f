//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Gauge quantities and the frame-driven animator."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::trace;

use crate::interpolator::{InterpolationJob, ValueInterpolator};
use crate::tank::{Tank, TankId};

/// Quantities a tank gauge displays, each as a fraction of the tank maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeQuantity {
    Level,
    Critical,
    Warning,
}

impl GaugeQuantity {
    pub const ALL: [GaugeQuantity; 3] = [
        GaugeQuantity::Level,
        GaugeQuantity::Critical,
        GaugeQuantity::Warning,
    ];

    pub fn fraction_of(self, tank: &Tank) -> f64 {
        let value = match self {
            GaugeQuantity::Level => tank.current(),
            GaugeQuantity::Critical => tank.critical(),
            GaugeQuantity::Warning => tank.warning(),
        };
        value / tank.max()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QuantityId {
    pub tank: TankId,
    pub quantity: GaugeQuantity,
}

impl QuantityId {
    pub fn new(tank: TankId, quantity: GaugeQuantity) -> Self {
        Self { tank, quantity }
    }
}

impl fmt::Display for QuantityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quantity = match self.quantity {
            GaugeQuantity::Level => "level",
            GaugeQuantity::Critical => "critical",
            GaugeQuantity::Warning => "warning",
        };
        write!(f, "tank-{}/{}", self.tank, quantity)
    }
}

/// Receives one value per animation frame per live job.
pub trait GaugeRenderer: Send + Sync {
    fn on_value_frame(&self, quantity: QuantityId, value: f64);
}

impl<R: GaugeRenderer + ?Sized> GaugeRenderer for Arc<R> {
    fn on_value_frame(&self, quantity: QuantityId, value: f64) {
        (**self).on_value_frame(quantity, value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingGaugeRenderer;

impl GaugeRenderer for TracingGaugeRenderer {
    fn on_value_frame(&self, quantity: QuantityId, value: f64) {
        trace!(%quantity, value, "gauge frame");
    }
}

#[derive(Debug)]
struct Slot {
    last_emitted: f64,
    job: Option<InterpolationJob>,
}

/// Owns the live interpolation job of every displayed quantity.
///
/// Each quantity has its own lock, so a retarget from the data tick and a
/// frame advance for the same quantity are serialised while different
/// quantities never contend.
#[derive(Debug)]
pub struct Animator {
    interpolator: ValueInterpolator,
    slots: RwLock<IndexMap<QuantityId, Arc<Mutex<Slot>>>>,
}

impl Default for Animator {
    fn default() -> Self {
        Self::new(ValueInterpolator::default())
    }
}

impl Animator {
    pub fn new(interpolator: ValueInterpolator) -> Self {
        Self {
            interpolator,
            slots: RwLock::new(IndexMap::new()),
        }
    }

    /// Declare a quantity with its starting display value. Re-registering
    /// resets the slot and drops any live job.
    pub fn register(&self, quantity: QuantityId, initial: f64) {
        let slot = Slot {
            last_emitted: initial,
            job: None,
        };
        self.slots.write().insert(quantity, Arc::new(Mutex::new(slot)));
    }

    /// Register the three gauge quantities of `tank` at their current fractions.
    pub fn register_tank(&self, tank: &Tank) {
        for quantity in GaugeQuantity::ALL {
            self.register(QuantityId::new(tank.id(), quantity), quantity.fraction_of(tank));
        }
    }

    /// Point `quantity` at a new target. Returns `false` when the target is
    /// already the one being approached or displayed.
    ///
    /// A job in flight is replaced by one starting from its last emitted
    /// value. A quantity never registered starts from `min`.
    pub fn retarget(&self, quantity: QuantityId, target: f64, min: f64, max: f64) -> bool {
        let slot = self.slot_or_insert(quantity, min);
        let mut slot = slot.lock();
        let next = match &slot.job {
            Some(job) if job.target() == target => return false,
            Some(job) => job.retarget(target, min, max),
            None if slot.last_emitted == target => return false,
            None => self.interpolator.start(slot.last_emitted, target, min, max),
        };
        slot.job = Some(next);
        true
    }

    /// Retarget the three gauge quantities of `tank` over `[0, 1]`.
    pub fn track_tank(&self, tank: &Tank) -> usize {
        GaugeQuantity::ALL
            .into_iter()
            .filter(|quantity| {
                self.retarget(
                    QuantityId::new(tank.id(), *quantity),
                    quantity.fraction_of(tank),
                    0.0,
                    1.0,
                )
            })
            .count()
    }

    /// Advance every live job by one frame and hand the values to `renderer`.
    /// Returns the number of frames emitted.
    pub fn advance_all(&self, renderer: &dyn GaugeRenderer) -> usize {
        let slots: Vec<(QuantityId, Arc<Mutex<Slot>>)> = self
            .slots
            .read()
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect();

        let mut emitted = 0;
        for (quantity, slot) in slots {
            let value = {
                let mut slot = slot.lock();
                let Some(job) = slot.job.as_mut() else {
                    continue;
                };
                let value = job.advance_frame();
                if job.is_finished() {
                    slot.job = None;
                }
                slot.last_emitted = value;
                value
            };
            renderer.on_value_frame(quantity, value);
            emitted += 1;
        }
        emitted
    }

    /// Last value handed to the renderer, or the registered start value.
    pub fn value(&self, quantity: QuantityId) -> Option<f64> {
        let slot = self.slots.read().get(&quantity).cloned()?;
        let value = slot.lock().last_emitted;
        Some(value)
    }

    pub fn is_animating(&self, quantity: QuantityId) -> bool {
        self.slots
            .read()
            .get(&quantity)
            .map(|slot| slot.lock().job.is_some())
            .unwrap_or(false)
    }

    pub fn live_jobs(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.lock().job.is_some())
            .count()
    }

    pub fn quantities(&self) -> Vec<QuantityId> {
        self.slots.read().keys().copied().collect()
    }

    fn slot_or_insert(&self, quantity: QuantityId, seed: f64) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.read().get(&quantity) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(quantity)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    last_emitted: seed,
                    job: None,
                }))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(QuantityId, f64)>>,
    }

    impl GaugeRenderer for Recorder {
        fn on_value_frame(&self, quantity: QuantityId, value: f64) {
            self.frames.lock().push((quantity, value));
        }
    }

    fn level(tank: TankId) -> QuantityId {
        QuantityId::new(tank, GaugeQuantity::Level)
    }

    #[test]
    fn unregistered_quantity_seeds_from_lower_clamp() {
        let animator = Animator::new(ValueInterpolator::new(4));
        assert!(animator.retarget(level(1), 0.8, 0.0, 1.0));
        let recorder = Recorder::default();
        animator.advance_all(&recorder);
        let frames = recorder.frames.lock();
        assert!((frames[0].1 - 0.2).abs() < 1e-12);
    }

    #[test]
    fn runs_job_to_completion_then_idles() {
        let animator = Animator::new(ValueInterpolator::new(3));
        animator.register(level(1), 0.0);
        animator.retarget(level(1), 0.6, 0.0, 1.0);
        let recorder = Recorder::default();
        for _ in 0..5 {
            animator.advance_all(&recorder);
        }
        let frames = recorder.frames.lock();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].1, 0.6);
        assert!(!animator.is_animating(level(1)));
        assert_eq!(animator.value(level(1)), Some(0.6));
    }

    #[test]
    fn retarget_mid_flight_continues_from_last_frame() {
        let animator = Animator::new(ValueInterpolator::new(10));
        animator.register(level(1), 0.0);
        animator.retarget(level(1), 1.0, 0.0, 1.0);
        let recorder = Recorder::default();
        for _ in 0..3 {
            animator.advance_all(&recorder);
        }
        let before = animator.value(level(1)).unwrap();
        animator.retarget(level(1), 0.0, 0.0, 1.0);
        animator.advance_all(&recorder);
        let after = animator.value(level(1)).unwrap();
        assert!(after < before);
        assert!((before - after - before / 10.0).abs() < 1e-12);
    }

    #[test]
    fn unchanged_target_is_ignored() {
        let animator = Animator::default();
        animator.register(level(2), 0.5);
        assert!(!animator.retarget(level(2), 0.5, 0.0, 1.0));
        assert!(animator.retarget(level(2), 0.7, 0.0, 1.0));
        assert!(!animator.retarget(level(2), 0.7, 0.0, 1.0));
        assert_eq!(animator.live_jobs(), 1);
    }

    #[test]
    fn tank_quantities_follow_fractions() {
        let mut tank = Tank::new(3, "3", 0.0, 1000.0);
        tank.set_critical(100.0);
        tank.set_warning(300.0);
        let animator = Animator::new(ValueInterpolator::new(1));
        animator.register_tank(&tank);
        assert_eq!(animator.quantities().len(), 3);

        tank.set_current(500.0);
        assert_eq!(animator.track_tank(&tank), 1);
        animator.advance_all(&TracingGaugeRenderer);
        assert_eq!(animator.value(level(3)), Some(0.5));
        assert_eq!(
            animator.value(QuantityId::new(3, GaugeQuantity::Warning)),
            Some(0.3)
        );
    }

    #[test]
    fn different_quantities_advance_independently() {
        let animator = Animator::new(ValueInterpolator::new(2));
        animator.retarget(level(1), 1.0, 0.0, 1.0);
        animator.retarget(level(2), 0.5, 0.0, 1.0);
        let recorder = Recorder::default();
        assert_eq!(animator.advance_all(&recorder), 2);
        assert_eq!(animator.advance_all(&recorder), 2);
        assert_eq!(animator.advance_all(&recorder), 0);
        assert_eq!(animator.value(level(1)), Some(1.0));
        assert_eq!(animator.value(level(2)), Some(0.5));
    }
}
