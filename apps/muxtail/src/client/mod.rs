pub mod backoff;
pub mod connection;
pub mod coordinator;
pub mod events;
pub mod loader;

pub use connection::{ConnectionManager, ConnectionState};
pub use coordinator::ViewCoordinator;
pub use loader::{
    HistoryRequest, OutputWindowLoader, ScrollMetrics, SnapshotOutcome, ViewCommand,
};
