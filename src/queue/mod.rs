pub mod events;
pub mod queue;

pub use events::{ActionEvent, EventKind};
pub use queue::{ActionQueue, QueueStats};
