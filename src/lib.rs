pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod gulp;
pub mod registry;
pub mod runner;
