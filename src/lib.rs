//! Scheduled health checks with signal history and alerting
//!
//! Alarms describe what to check and how often. The scheduler turns them into
//! periodic `alarm:check` tasks; workers run the alarm's sentinel, store the
//! resulting signal and cascade notification and dashboard tasks when the
//! alarm's status changes.

pub mod actors;
pub mod alarm;
pub mod config;
pub mod connections;
pub mod dashboard;
pub mod notification;
pub mod pipeline;
pub mod sentinel;
pub mod signal;
pub mod storage;
pub mod tasks;
pub mod util;
