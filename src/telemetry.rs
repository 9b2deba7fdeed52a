mod message;
mod transmitter;

pub use message::*;
pub use transmitter::*;
