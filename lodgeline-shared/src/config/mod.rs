//! # Configuration
//!
//! Runtime configuration for the server and the command-line tools.

pub mod server;
