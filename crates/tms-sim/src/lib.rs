//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "01-bootstrap"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Simulation runtime module exports and shared types."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
//! Tank fleet simulation for TMS.
//!
//! Dataset playback ([`MeasurementFeed`]) drives a [`SimulationClock`] that
//! mutates [`Tank`] levels and thresholds; threshold crossings leave through
//! an [`AlertSink`], and displayed quantities are eased by the [`Animator`]
//! before reaching a [`GaugeRenderer`].

pub mod alerts;
pub mod clock;
pub mod error;
pub mod feed;
pub mod gauge;
pub mod interpolator;
pub mod tank;

pub use alerts::{
    Alert, AlertLog, AlertSink, ChannelAlertSink, FanoutAlertSink, LogColor, LogEntry, Severity,
    TracingAlertSink,
};
pub use clock::{SimulationClock, TickReport};
pub use error::{Result, SimError};
pub use feed::{Measurement, MeasurementFeed, MeasurementStream};
pub use gauge::{Animator, GaugeQuantity, GaugeRenderer, QuantityId, TracingGaugeRenderer};
pub use interpolator::{InterpolationJob, ValueInterpolator};
pub use tank::{Crossings, Tank, TankId, TankIdentity};
