pub mod backfill;
pub mod config;
pub mod enrichment;
pub mod history_db;
pub mod normalize;
pub mod poll;
pub mod service;
pub mod sync;
