pub mod champion;
pub mod config;
pub mod constants;
pub mod error;
pub mod grid;
pub mod path;
pub mod pattern;
pub mod profile;
pub mod rng;
pub mod room;
pub mod scoring;
pub mod server_protocol;
pub mod session;
pub mod storage;
pub mod types;
pub mod xp;
