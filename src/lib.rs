pub mod agent;
pub mod config;
pub mod control;
pub mod export;
pub mod ingest;
pub mod latch;
pub mod session;
pub mod sink;
