//! # GameCheck Core
//!
//! Core types, configuration, and storage for GameCheck.
//!
//! This crate provides:
//! - Configuration loading and validation (JSON5 format)
//! - Shared domain types for user activity
//! - Bounded per-user activity history backed by sled

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod history;
pub mod types;

pub use config::{Config, ConfigError, MissingLimiterPolicy, RateClassConfig};
pub use history::{HistoryError, HistoryStore, HistoryTrimmer, SledHistoryStore};
pub use types::{ActivityKind, GameStatus, HistoryRecord, UserId};
