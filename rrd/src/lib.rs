//! # rrd
//!
//! Two-resolution round-robin time-series store.
//!
//! rrd keeps a fixed-size history of one numeric metric at two resolutions:
//! the last 60 minutes and the last 24 hours. Each resolution is a ring of
//! slots that wraps around once full, so storage never grows with data
//! volume. Skipped intervals are recorded explicitly as placeholders, which
//! keeps every ring a contiguous timeline.
//!
//! ## Key Properties
//!
//! - Bounded storage: 60 minute slots and 24 hour slots, nothing else
//! - Gap filling at write time, capped at one ring's worth of placeholders
//! - Same-interval samples folded in place (minimum by default)
//! - Pluggable persistence: SQLite tables or a key-value layout over an
//!   in-process map, a JSON file, or Redis (feature `redis`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rrd::{Backing, RingKind, Store, Summary};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open or create a SQLite-backed store
//! let mut store = Store::open(&Backing::sqlite("./rrd-data.db"))?;
//!
//! // Timestamps are seconds since the Unix epoch
//! store.save(1_484_059_362, 12.5)?;
//! store.save(1_484_059_480, 14.0)?;
//!
//! // Read the minute ring back, oldest first
//! let minutes = store.query(RingKind::Minutes)?;
//! for sample in &minutes {
//!     if let (Some(ts), value) = (sample.timestamp, sample.value) {
//!         println!("{ts}: {value:?}");
//!     }
//! }
//! println!("{}", Summary::from_samples(&minutes));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: Top-level handle; implements save and query over a backend
//! - [`Backend`]: Persistence contract shared by every storage engine
//! - [`Backing`]: `engine:location` descriptor used to open a backend
//! - [`Sample`]: One ring slot: empty, placeholder, or value
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`store`]: Save and query semantics
//! - [`ring`]: Ring geometry, gap filling, and chronological rotation
//! - [`backend`]: SQLite and key-value backends
//! - [`aggregation`]: Rules for folding samples into an existing slot
//! - [`summary`]: Descriptive statistics over a ring
//! - [`error`]: Error types

pub mod aggregation;
pub mod backend;
pub mod error;
pub mod ring;
pub mod store;
pub mod summary;

// Re-export primary API types at crate root for convenience.
pub use aggregation::Aggregation;
pub use backend::{Backend, Backing, EngineKind};
pub use error::{Result, RrdError};
pub use ring::{RingKind, Sample};
pub use store::{SaveOutcome, Store};
pub use summary::Summary;
