//! Id generation for Folio.
//!
//! Provides domain-separated BLAKE3 composition of document ids from
//! unique-key values, and the single random id generator used everywhere an
//! id is not composed. Both produce 32 lowercase hex characters.
//!
//! All hashing and randomness wraps established libraries.

pub mod hasher;
pub mod random;

pub use hasher::IdHasher;
pub use random::{random_hex, random_id};
