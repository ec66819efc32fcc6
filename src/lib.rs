//! healthwatch: a service health-monitoring engine.
//!
//! Services carry an embedded monitoring configuration. A cron-driven
//! [`monitor::scheduler::Scheduler`] periodically scans them, probes the ones
//! that are due and persists the resulting health status.

pub mod db;
pub mod monitor;
pub mod server;
pub mod web;
