//! Chiral core: a decentralized peer-to-peer file-sharing engine.
//!
//! Six cooperating components, leaves first: a content-addressed store
//! (`cas`), a Kademlia overlay (`kad`), NAT traversal (`nat`), peer
//! reputation (`reputation`), protocol adapters (`adapters`), a transfer
//! engine (`transfer`), and hosting agreements (`hosting`) on top.
//! `crypto` and `signer` provide end-to-end encryption and a narrow
//! signing interface shared across components; `share` covers the
//! share-link entity's core-owned invariants.

pub mod adapters;
pub mod cas;
pub mod cli;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod hosting;
pub mod kad;
pub mod logging;
pub mod nat;
pub mod reputation;
pub mod resilience;
pub mod share;
pub mod signer;
pub mod transfer;
pub mod transfer_driver;
pub mod ui;

pub use error::{ChiralError, ChiralResult};
