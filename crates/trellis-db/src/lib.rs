//! Relational store for the workflow orchestrator.
//!
//! Owns the full data model: trees, nodes, edges and guards on the
//! authoring side; runs, run-nodes, runtime edges, join barriers,
//! artifacts, routing decisions, diagnostics and stream events on the
//! execution side. All invariants on that schema are enforced by
//! constraints and triggers in `migrations/`, not by this crate.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
