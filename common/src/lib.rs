// Medication reminder engine: scheduling, escalation and push delivery

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod preferences;
pub mod push;
pub mod quiet_hours;
pub mod reminders;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod telemetry;
