mod csv_log;
mod error;
mod mirror;
mod reachability;
mod writer;

pub use csv_log::*;
pub use error::*;
pub use mirror::*;
pub use reachability::*;
pub use writer::*;
