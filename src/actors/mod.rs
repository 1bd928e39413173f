//! Long-running actors of the hub
//!
//! Each actor runs as an independent async task and is controlled through a
//! handle wrapping its mpsc command channel.
//!
//! ## Architecture Overview
//!
//! ```text
//!   AlarmRepository
//!         │ sync
//!   ┌─────▼──────────┐  register/deregister  ┌──────────────────┐
//!   │ SchedulerActor ├──────────────────────►│ PeriodicTriggers │
//!   └────────────────┘                       └────────┬─────────┘
//!                                                     │ enqueue on tick
//!                                            ┌────────▼─────────┐
//!                                            │    TaskQueue     │◄──── cascade
//!                                            └────────┬─────────┘        │
//!                                                     │ dequeue          │
//!                                            ┌────────▼─────────┐        │
//!                                            │    WorkerPool    ├────────┘
//!                                            │  (TaskRouter)    │
//!                                            └──────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: keeps one periodic trigger per alarm plus the retention cleanup
//! - **WorkerPool**: runs queued tasks through their handlers and applies the retry policy
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for queries and acknowledged shutdown

pub mod messages;
pub mod scheduler;
pub mod worker;

pub use messages::{SyncReport, WorkerStats};
pub use scheduler::{SchedulerHandle, SchedulerSettings};
pub use worker::{TaskRouter, WorkerPoolHandle, WorkerSettings};
