//! Product ratings - event-driven rating aggregation
//!
//! Keeps a running average rating per product from a stream of review
//! changes, without ever re-reading the reviews themselves. Review changes
//! arrive on a partitioned log, are folded into a per-product accumulator
//! with offset-fenced conditional writes, and the recomputed average is
//! published back to the log.

pub mod bus;
pub mod config;
pub mod events;
pub mod handlers;
pub mod repository;
pub mod storage;
pub mod utils;
