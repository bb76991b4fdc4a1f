mod actor;
mod client;
mod event;
mod options;
mod state;

pub use actor::DriverActor;
pub use client::DriverClient;
pub use event::DriverEvent;
pub use options::DriverOptions;
pub use state::{ClusterSnapshot, WorkerCapabilities, WorkerRegistration, WorkerSnapshot};
