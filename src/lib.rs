//! Leibniz - Multi-source literature search core
//!
//! Runs several retrieval backends concurrently under one deadline, fuses
//! their ranked lists into a single deterministic ranking, and keeps fused
//! results in a two-tier cache so repeat queries skip the backends.

pub mod backends;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod retrieval;

pub use error::{LeibnizError, Result};
