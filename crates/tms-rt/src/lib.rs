//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Runtime helpers supporting the scheduler."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
//! Periodic scheduling helpers for the TMS runtime.

pub mod scheduling;

pub use scheduling::{RateLimiter, TaskGroup};
