mod exchange;
mod partitioner;

pub use exchange::ShuffleExchange;
pub use partitioner::Partitioner;
