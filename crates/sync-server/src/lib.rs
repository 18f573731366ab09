//! Server session dispatcher (C6): the per-connection state machine, the
//! HTTP dashboard/init surface, and UDP discovery. `main.rs` wires these
//! against a [`change_log::Store`] and [`auth::Auth`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod hub;
pub mod http;

pub use config::ServerConfig;
pub use dispatch::ServerContext;
pub use hub::Hub;
