//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Shared primitives and utilities for the core runtime."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
//! Core shared primitives for the TMS workspace.
//! This crate exposes configuration loading and logging setup consumed by the
//! simulation, scheduler and daemon crates.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AnimationConfig, AppConfig, ClockConfig, DatasetConfig, LoadedAppConfig, LoggingConfig,
    SyntheticConfig, TankConfig, ThresholdConfig,
};
pub use logging::{init_tracing, LogFormat};
