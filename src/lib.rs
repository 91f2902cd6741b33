//! # Projector
//!
//! Backend for the proteje portfolio site. Its one piece of real machinery is
//! the Destiny 2 manifest pipeline: download Bungie's versioned content
//! bundle, unpack the SQLite content store inside it, re-key the definition
//! tables by semantic hash, and serve lookups from the result.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Fetch   │──▶│  Extract  │──▶│  Transform  │──▶│ Lookup store │
//! │ (Bungie) │   │   (zip)   │   │ (re-key)    │   │   (SQLite)   │
//! └──────────┘   └───────────┘   └─────────────┘   └──────┬───────┘
//!                                                          │
//!                                   ┌──────────────────────┤
//!                                   ▼                      ▼
//!                              ┌──────────┐          ┌───────────┐
//!                              │  Lookup  │◀─────────│  Builds   │
//!                              └──────────┘          └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Pointer, definition, and table types |
//! | [`error`] | Pipeline and lookup error types |
//! | [`fetch`] | Manifest pointer and bundle download |
//! | [`archive`] | Bundle extraction |
//! | [`transform`] | Re-keying into the lookup store |
//! | [`lookup`] | Definition queries |
//! | [`pipeline`] | Fetch → extract → transform orchestration |
//! | [`builds`] | Build assembly over lookups |
//! | [`resources`] | Static JSON resources |
//! | [`server`] | HTTP API |
//! | [`db`] | SQLite connections |

pub mod archive;
pub mod builds;
pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod lookup;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod resources;
pub mod server;
pub mod stats;
pub mod transform;
