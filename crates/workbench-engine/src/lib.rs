//! workbench-engine - Environment lifecycle reconciliation engine
//!
//! Receives asynchronous, at-least-once status events from provisioning
//! backends, advances durably persisted environment records through the
//! canonical state machine, brokers short-lived cross-account credentials,
//! and delegates provisioning verbs to per-environment-type backends.

pub mod broker;
pub mod bus;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod store;
