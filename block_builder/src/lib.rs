//! The block-builder: consumes trace records from a partitioned, durable log and
//! compacts them into immutable, content-addressed storage blocks.
//!
//! The hard engineering lives in the consume -> build -> flush -> commit cycle per
//! partition (see [`partition_consumer`]): it gives exactly-once-into-storage semantics
//! on top of a log that only offers at-least-once delivery, by deriving block identity
//! deterministically from cycle boundaries so a reprocessed cycle overwrites rather than
//! duplicates (see [`storage::BlockId::derive`]).
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs, clippy::use_self)]

pub mod assignment;
pub mod config;
pub mod cycle;
pub mod decode;
pub mod lag;
pub mod metrics;
pub mod overrides;
pub mod partition_consumer;
pub mod ring;
pub mod section;
pub mod service;
pub mod storage;
