pub mod audit;
pub mod chart;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod history;
pub mod ingest;
pub mod mail;
pub mod normalize;
pub mod registry;
pub mod report;
pub mod stats;
pub mod store;
pub mod task;
pub mod trend;
