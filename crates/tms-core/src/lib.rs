//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Simulation scheduling and lifecycle management."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
//! Scheduler owning the periodic tasks of the TMS simulation.

pub mod scheduler;

pub use scheduler::{SchedulerHandle, SchedulerStatus, SimulationScheduler};
