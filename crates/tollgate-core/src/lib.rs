//! # tollgate-core
//!
//! Core engine for tollgate: governs traffic into, and cost exposure
//! against, a metered pay-per-byte analytical warehouse.
//!
//! Write path: records are admitted into the [`aggregator`], flushed by
//! size or age through the [`gateway`] with bounded [`retry`].
//!
//! Read path: queries are dry-run and gated by the [`admission`]
//! controller against the [`ledger`]'s current ceiling; executed jobs feed
//! the [`monitor`], which is the only component that records spend.
//!
//! [`governor::Governor`] wires one of each together.

pub mod admission;
pub mod aggregator;
pub mod clock;
pub mod gateway;
pub mod governor;
pub mod ledger;
pub mod memory;
pub mod monitor;
pub mod retry;
pub mod validation;

pub use governor::Governor;
