//! Scheduling of rule groups
//!
//! A [`Task`] evaluates its rules once per period on a phase derived from
//! its name. The [`Manager`] keeps one task per group key and carries
//! alert state across reloads.

pub mod config;
pub mod group;
pub mod manager;

pub use config::{ConfigError, ManagerOptions, DEFAULT_FREQUENCY, DEFAULT_RESEND_DELAY};
pub use group::{group_key, Task, TaskContext};
pub use manager::Manager;
