//! Warden - a license binding and verification server
//!
//! Warden validates software license keys against a per-account or
//! per-device binding, enforces expiry and activation-count limits,
//! and records an audit trail of every decision. The heart of the
//! crate is the pure decision state machine in [`engine`]; persistence
//! and orchestration live behind the `server` feature.
//!
//! # Features
//!
//! - `server` - Server components (service, handlers, storage). Enabled by default.
//! - `sqlite` - SQLite storage backend. Enabled by default.
//! - `postgres` - PostgreSQL storage backend.
//!
//! # Example
//!
//! ```toml
//! # Use defaults (server + sqlite)
//! warden = "0.1"
//!
//! # Decision engine only (no server components)
//! warden = { version = "0.1", default-features = false }
//!
//! # Server with PostgreSQL
//! warden = { version = "0.1", features = ["server", "postgres"] }
//! ```

// Core modules (always available)
pub mod audit;
pub mod config;
pub mod engine;
pub mod errors;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;
