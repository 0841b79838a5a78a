//! Core domain types
//!
//! These types represent the persisted job row and the values produced while a
//! job is executed. They carry structure only; persistence lives in the engine.

pub mod event;
pub mod execution;
pub mod job;
pub mod message;
pub mod product;
