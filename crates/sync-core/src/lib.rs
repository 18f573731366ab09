//! Core primitives shared by the vault sync client and server: crypto
//! (C1), the wire protocol (C2), and small id/time helpers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod ids;
pub mod wire;

pub use crypto::{CryptoError, Password, VaultKey};
pub use wire::{ChangeEntry, ClientInfo, Frame, Message};
