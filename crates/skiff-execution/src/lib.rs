pub mod driver;
pub mod error;
pub mod id;
pub mod job;
pub mod job_runner;
pub mod rpc;
pub mod shuffle;
pub mod stream;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use worker::run_worker;
