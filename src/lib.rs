//! sievedb - query planning and evaluation over a sharded, sorted KV store
//!
//! Cost-bounded rewriting of boolean query trees, disk-backed
//! materialization of oversized terms, and a concurrent, resumable
//! evaluation pipeline.

pub mod ast;
pub mod context;
pub mod expand;
pub mod ivarator;
pub mod metadata;
pub mod observability;
pub mod pipeline;
pub mod planner;
pub mod scan;
