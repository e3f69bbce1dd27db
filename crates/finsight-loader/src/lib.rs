pub mod config;
pub mod daemon;
pub mod error;
pub mod inbox;
pub mod sweep;
