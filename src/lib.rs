//! tasks-plan - task planning on top of Usable memory fragments
//!
//! Tasks are stored as fragments in a Usable workspace. Each fragment carries
//! a YAML-style frontmatter header, a markdown description and an optional
//! comments block; status, priority and projects ride along as namespaced
//! tags so the remote store can filter on them.
//!
//! # Core Concepts
//!
//! - **Codec**: lossless mapping between [`model::Task`] and fragment payloads
//! - **Session**: OAuth tokens with proactive refresh
//! - **Cache**: short-lived snapshot of the workspace task list
//! - **Dedup**: collapses identical concurrent writes into one request
//! - **Dependencies**: a DAG over task ids, kept acyclic on every insert
//!
//! # Module Organization
//!
//! - `auth`: token providers and the persisted OAuth session
//! - `broadcast`: change notification for task-list observers
//! - `cache`: TTL cache over the workspace task list
//! - `cli`: command-line interface using clap
//! - `codec`: frontmatter encoding and decoding
//! - `config`: settings loading from `tasks-plan.toml`
//! - `dedup`: in-flight request deduplication
//! - `error`: error types and result aliases
//! - `graph`: dependency edges and cycle detection
//! - `lock`: file locking and atomic writes
//! - `model`: task and fragment types
//! - `output`: human and JSON output envelopes
//! - `remote`: Usable fragment API client
//! - `service`: task operations composed from the pieces above
//! - `storage`: on-disk state directory
//! - `workspace`: connected workspace pointer

pub mod auth;
pub mod broadcast;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod error;
pub mod graph;
pub mod lock;
pub mod model;
pub mod output;
pub mod remote;
pub mod service;
pub mod storage;
pub mod workspace;

pub use error::{Error, Result};
