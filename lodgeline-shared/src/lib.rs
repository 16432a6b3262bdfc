#![cfg_attr(not(test), forbid(unsafe_code))]

//! Types shared by the Lodgeline server, client library, and CLI.
//!
//! The wire models in [`models`] are what travels over HTTP and through the
//! hub, [`topics`] derives hub topic names, and [`config`] loads the runtime
//! configuration.

pub mod config;
pub mod models;
pub mod topics;
