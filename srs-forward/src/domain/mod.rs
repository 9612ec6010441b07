//! Domain types shared by the registry, the supervisors and the store.

mod destination;
mod stream;
mod task;

pub use destination::DestinationConfig;
pub use stream::{DEFAULT_VHOST, StreamIdentity};
pub use task::{SupervisorState, TaskExit, TaskRecord, TaskSnapshot};
