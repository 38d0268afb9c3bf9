//! Umbrella crate for Lorepin.
//!
//! This crate is intentionally small: it re-exports the engine and protocol crates
//! so downstream code can depend on a single crate name (`lorepin`).

pub use lorepin_engine as engine;
pub use lorepin_protocol as protocol;
