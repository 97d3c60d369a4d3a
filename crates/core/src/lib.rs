//! Flor Core - Shared domain types.
//!
//! This crate provides the types shared by every Flor component:
//! - `migrate` - Backup, restore and schema-migration pipeline
//! - `cli` - Command-line entry point for operators
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no
//! HTTP clients. Values validate on construction so that a record which
//! made it into a model type already satisfies the catalog invariants
//! (non-negative prices, positive quantities, well-formed cart codes).
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, quantities, cart codes and emails
//! - [`models`] - Catalog and order entities as they are stored and exported

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod models;
pub mod types;

pub use models::*;
pub use types::*;
