
//! # RabbitMQ Trail Worker
//! A RabbitMQ worker library that quarantines bad messages in a garbage queue,
//! restarts with exponential backoff after a crash, and carries a trail
//! (correlation id + liveness flag) through every message it processes.

pub mod backoff;
pub mod config;
pub mod error;
pub mod garbage;
pub mod queue;
pub mod rabbit;
pub mod task;
pub mod trail;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key components for easy access
pub use backoff::{Backoff, BackoffConfig, Sleeper, TokioSleeper};
pub use config::{WorkerConfig, WorkerConfigBuilder};
pub use error::{TaskError, WorkerError};
pub use garbage::GarbageRoute;
pub use queue::{AckHandle, Connector, Delivery, Message, Queue};
pub use rabbit::{RabbitConnector, RabbitQueue};
pub use task::{Task, TaskClass, TaskFn, WorkerHandler};
pub use trail::{EventType, TraceEvent, TraceOutcome, TraceSettings, Trail, TrailContext};
pub use worker::{Attempt, StopHandle, Worker};
