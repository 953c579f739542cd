//! Service layer: scheduling, resource locking, step execution, events.

pub mod events;
pub mod local_executor;
pub mod remote_executor;
pub mod resource_pool;
pub mod retry;
pub mod scheduler;

pub use events::{StatusEvent, StatusEventBus};
pub use local_executor::LocalExecutor;
pub use remote_executor::{ConnectError, RemoteExecutor, RemoteSession};
pub use resource_pool::{AcquireResult, ResourcePool};
pub use retry::StepRetryPolicy;
pub use scheduler::{score_case, PriorityScheduler};
