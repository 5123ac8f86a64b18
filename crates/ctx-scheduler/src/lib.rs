//! Context expression scheduler
//!
//! Keeps registered context expressions up to date with the least work:
//! each root is re-evaluated at its defer-until deadline, and sensor pushes
//! pull forward only roots whose deadline is not guaranteed.
//!
//! ```ignore
//! let engine = Engine::builder(sensors).clock(clock).build();
//! engine.register("too_hot", expression, CallbackTargets::default().when_true("alerts"))?;
//! engine.start();
//! ```

pub mod callback;
mod engine;
mod error;
pub mod queue;
mod queued;
pub mod store;

pub use callback::{BusSink, CallbackSink, ChannelSink, Notification};
pub use engine::{Engine, EngineBuilder, SchedulerConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use queue::DeadlineQueue;
pub use queued::{CallbackTargets, ExpressionStats, QueuedExpression};
pub use store::{
    ExpressionStore, JsonFileStore, MemoryStore, StoreError, StoreResult, StoredExpression,
};
