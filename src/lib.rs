//! # playerstore
//!
//! Persistence and caching layer for player character state in a
//! multiplayer game server.
//!
//! The layer loads and saves a player's full state (attributes,
//! inventory, death history, mail) against a SQLite store and keeps two
//! caches in front of it:
//!
//! - **Name cache** — a bidirectional name ↔ identifier bijection, fed
//!   lazily from store lookups and never evicted (names and identifiers
//!   are immutable for the process lifetime).
//! - **Unjust-kill cache** — per-player, per-window (day/week/month)
//!   cached counts of unjustified kills with explicit staleness
//!   tracking: a cached count expires exactly when the oldest counted
//!   kill ages out of its rolling window.
//!
//! The entry point is [`PlayerStore`]: one instance per process,
//! explicitly constructed and shared by reference across request
//! workers.
//!
//! ```no_run
//! # use playerstore::{PlayerStore, PlayerRecord, StoreConfig, UnjustKillPeriod};
//! let store = PlayerStore::open("world.db", &StoreConfig::default())?;
//! let mut record = PlayerRecord::default();
//! if store.load_player(&mut record, "Sir Lancelot", false)? {
//!     let kills = store.unjust_kill_count(
//!         record.id.expect("loaded"),
//!         UnjustKillPeriod::Week,
//!     )?;
//!     println!("{} unjust kills this week", kills);
//! }
//! # Ok::<(), playerstore::StoreError>(())
//! ```

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod items;
pub mod kill_cache;
pub mod name_cache;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use items::{Item, ItemAttributes, ItemBlock};
pub use kill_cache::UnjustKillCache;
pub use name_cache::NameCache;
pub use store::PlayerStore;
pub use types::*;
