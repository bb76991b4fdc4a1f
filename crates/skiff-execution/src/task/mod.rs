mod definition;

pub use definition::*;
