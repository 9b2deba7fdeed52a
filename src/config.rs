mod error;
mod raw;
mod station;
mod validate;

pub use error::*;
pub use raw::*;
pub use station::*;
pub use validate::*;
