//! Foundation types for Folio.
//!
//! This crate provides the identity, temporal and document-shape types used
//! throughout the Folio collection layer. Every other Folio crate depends on
//! `folio-types`.
//!
//! # Key Types
//!
//! - [`DocumentId`] -- validated, immutable document identifier
//! - [`Timestamp`] / [`HybridLogicalClock`] -- monotonic write stamps
//! - [`Stored`] / [`Draft`] / [`Meta`] -- the document envelope around typed data
//! - [`FieldPath`] / [`FieldOp`] -- addressing and partial writes of schemaless bodies
//! - [`Patch`] -- partial updates with explicit-absent deletion markers

pub mod envelope;
pub mod error;
pub mod fields;
pub mod identity;
pub mod patch;
pub mod temporal;

pub use envelope::{Draft, Meta, Record, Stored};
pub use error::TypeError;
pub use fields::{apply_ops, FieldOp, FieldPath, Fields};
pub use identity::{DocumentId, GENERATED_ID_HEX_LEN};
pub use patch::{Patch, PatchValue};
pub use temporal::{HybridLogicalClock, Timestamp};
