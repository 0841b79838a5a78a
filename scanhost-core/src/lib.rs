//! Scanhost Core
//!
//! Core types shared by the scanhost execution engine.
//!
//! This crate contains:
//! - Domain types: jobs, execution results, messages, events and product setups
//! - Parameters: well-known job parameter keys and their environment names

pub mod domain;
pub mod params;
