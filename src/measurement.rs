mod battery;
mod engine;
mod sound;

pub use battery::*;
pub use engine::*;
pub use sound::*;
