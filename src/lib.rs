#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

//! `sqlwarden` sits between an autonomous agent emitting free-form SQL and a
//! relational database, and lets only safe, bounded, auditable operations
//! through. Reads run on a session the database itself holds read-only;
//! writes go through a preview/confirm handshake: the statement is executed
//! inside a rolled-back transaction to measure its real impact, and only a
//! single-use, time-bounded token bound to the exact statement text can turn
//! that measurement into a commit.

pub mod audit;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod writes;

pub use audit::{AuditEntry, AuditFilter, AuditLog, AuditPhase, AuditRecord};
pub use classify::{Classification, RiskFlags, StatementKind, classify};
pub use config::WardenConfig;
pub use db::{JsonRow, SessionManager};
pub use error::{ConfigError, ExecutionError, Result, TokenError, WardenError};
pub use gateway::{ReadOutcome, Warden};
pub use policy::{AccessMode, PolicyVerdict, ReasonCode};
pub use writes::{CommitOutcome, PendingModification, PreviewOutcome, WriteCoordinator};
