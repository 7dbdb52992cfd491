//! Sluice Core
//!
//! Core types for the Sluice job execution subsystem.
//!
//! This crate contains:
//! - Domain types: job definitions, variables, results, log entries, object changes
//! - DTOs: request/response bodies exchanged between services
//! - The failure taxonomy recorded on results

pub mod domain;
pub mod dto;
pub mod error;
