//! # tollgate-types
//!
//! Core type definitions for tollgate, the cost-governed ingestion and
//! query admission engine.
//!
//! This crate is the foundation of the dependency graph -- `tollgate-core`
//! and the `tollgate` CLI both depend on it. It contains:
//!
//! - **[`error`]** -- [`GovernorError`] taxonomy and the crate [`Result`] alias
//! - **[`record`]** -- inbound [`record::Record`] sum type and its payloads
//! - **[`job`]** -- queries, cost estimates, job metrics and findings
//! - **[`config`]** -- configuration schema for every component

pub mod config;
pub mod error;
pub mod job;
pub mod record;

pub use error::{GovernorError, Result};
