//! Flor de Maio backup, restore and schema-migration pipeline.
//!
//! # Modules
//!
//! - [`store`] - Store capability, `PostgreSQL` and in-memory implementations
//! - [`snapshot`] - Point-in-time export to versioned JSON files
//! - [`upsert`] - Insert-or-replace by primary key, bounded batches
//! - [`remap`] - Legacy single category to join rows
//! - [`cart_rules`] - Cart item price capture and replay ordering
//! - [`site_config`] - Site configuration singleton
//! - [`replay`] - Snapshot replay with reference checks and verification
//! - [`orchestrator`] - Backup, reset, migrate, restore workflow
//! - [`config`] - Environment configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use flor_migrate::config::{DatabaseConfig, MigrateConfig};
//! use flor_migrate::orchestrator::{MigrationPlan, Orchestrator, StopSignal};
//! use flor_migrate::store::PgBinder;
//!
//! let db = DatabaseConfig::from_env()?;
//! let binder = PgBinder::new(db.url, db.max_connections);
//! let plan = MigrationPlan::new(MigrateConfig::from_env()?.backup_dir);
//! let outcome = Orchestrator::new(binder, plan, StopSignal::new()).run().await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart_rules;
pub mod config;
pub mod orchestrator;
pub mod remap;
pub mod replay;
pub mod site_config;
pub mod snapshot;
pub mod store;
pub mod upsert;
