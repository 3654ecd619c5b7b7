pub mod billing;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod routes;
