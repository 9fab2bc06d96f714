// Scheduler module driving the periodic reminder tasks

pub mod engine;

pub use engine::{ReminderTask, Scheduler, SchedulerConfig, SchedulerEngine, TaskReport};
