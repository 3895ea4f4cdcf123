//! Cluster registration command composition.
//!
//! Turns a cluster registration token into the copy-pasteable commands an
//! administrator runs to attach a downstream cluster: the manifest import
//! commands, the Linux and Windows node agent commands, and docker login
//! commands for private registries.

pub mod commands;
pub mod image;
pub mod server;

pub use commands::{RegistrationCommands, compose, login_command};
