//! SeaORM entities for the tables the monitoring engine reads and writes.

pub mod service;
pub mod setting;
