pub mod actor;
mod retry;

pub use retry::RetryStrategy;
