//! `phala-cloud` command-line front end.

pub mod args;
pub mod commands;
pub mod env_file;

pub use args::Cli;
pub use commands::run;
