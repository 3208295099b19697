pub mod cli;
pub mod config;
pub mod ingest;
pub mod motion;
pub mod schedule;
pub mod source;
pub mod status;
pub mod storage;
pub mod upload;
pub mod web;
