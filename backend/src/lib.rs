pub mod analysis;
pub mod config;
pub mod error;
pub mod report;
pub mod routes;
pub mod storage;
