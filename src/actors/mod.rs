//! Actors of the monitoring engine
//!
//! Each actor runs as an independent Tokio task and is controlled through a
//! handle holding its command channel.
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  SchedulerActor  │  fast / slow / cleanup timers
//!                 └────────┬─────────┘
//!                          │ batches (JoinSet + semaphore)
//!                 ┌────────▼─────────┐
//!                 │ probe tasks      │  ICMP / SNMP
//!                 └────────┬─────────┘
//!                          │ Engine::record
//!                 ┌────────▼─────────┐
//!                 │ Engine           │  evaluate + persist
//!                 └────────┬─────────┘
//!                          │ broadcast TransitionEvent
//!                 ┌────────▼─────────┐
//!                 │  NotifierActor   │  TransitionListener callbacks
//!                 └──────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Transitions are published to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for `run_now`

pub mod messages;
pub mod notifier;
pub mod scheduler;

pub use messages::{TickReport, TransitionEvent};
pub use notifier::{LogListener, NotifierHandle, TransitionListener};
pub use scheduler::{Scheduler, SchedulerHandle};
