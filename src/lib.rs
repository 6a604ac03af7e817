//! Gator - A multi-user command-line RSS aggregator
//!
//! Users register, add and follow feeds, and browse the newest posts of the
//! feeds they follow. The `agg` command polls feeds on a fixed interval,
//! always refreshing the feed that has gone longest without a fetch.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod handlers;
pub mod ingest;
pub mod scheduler;
