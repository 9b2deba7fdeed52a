mod clock;
mod cycle;
mod error;

pub use clock::*;
pub use cycle::*;
pub use error::*;
