//! Command line front end for the unfurl streaming engine.

pub mod cli;
pub mod commands;
pub mod config;
pub mod metrics;
pub mod render;

pub use cli::{Cli, Commands};
pub use commands::run;
