//! # Checkin
//!
//! A single-user accountability engine. It asks a short set of
//! questions every evening, turns the free-text answer into a
//! structured summary via a language model, appends the record to a
//! Google Doc, carries an open goal into the next day, and rolls the
//! week up into a recap every Sunday — all on a timezone-aware
//! schedule that survives restarts.

pub mod bot;
pub mod cli;
pub mod config;
pub mod docs;
pub mod errors;
pub mod gateway;
pub mod orchestrator;
pub mod schedule;
pub mod session;
pub mod store;
pub mod summarizer;
pub mod telemetry;
