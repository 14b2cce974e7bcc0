//! Runtime support for the streaming pipeline: sample transport, bounded
//! drop-on-full queues, background workers and the stall watchdog.

pub mod errors;
pub mod receiver;
pub mod sample;
pub mod sender;
pub mod watchdog;
pub mod worker;

pub use errors::{WorkError, WorkResult};
pub use receiver::{QueueReceiver, bounded_queue};
pub use sample::{Edge, SampleChunk, logic_unit_size, unit_value};
pub use sender::{ChannelMessage, Offer, QueueSender};
pub use watchdog::{OperationGuard, Stall, Watchdog, WatchdogHandle};
pub use worker::{CancelToken, WorkerHandle, spawn_worker};
