mod core;
mod handler;

pub use core::WorkerActor;
