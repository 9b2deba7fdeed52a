pub mod config;
pub mod hardware;
pub mod measurement;
pub mod reading;
pub mod station;
pub mod storage;
pub mod telemetry;
