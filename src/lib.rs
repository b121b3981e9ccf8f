// Library exports for the poolkeeper worker supervisor

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod signals;
