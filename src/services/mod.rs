pub mod catalog_writer;
pub mod classifier;
pub mod cleanup;
pub mod enrichment;
pub mod error;
pub mod ingest;
pub mod json_import;
pub mod m3u_parser;
pub mod metrics;
pub mod notifier;
pub mod redis;
pub mod retry;
pub mod tmdb;
pub mod xmltv;
