//! Cron-driven execution of monitor rules
//!
//! A single background task ticks at a fixed poll interval. Each tick
//! compares the current time with every scheduled rule's recorded next run;
//! due rules are evaluated in turn and triggered results are dispatched.
//! Occurrences missed while the scheduler was busy or stopped collapse into
//! one catch-up run.

pub mod cron;
pub mod runner;

pub use self::cron::{CronSchedule, ScheduleError};
pub use runner::{MonitorScheduler, SchedulerConfig, SchedulerError, SchedulerState, TickSummary};
