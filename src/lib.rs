//! Track-to-catalog matching engine - shared modules for the CLI and tests.

pub mod catalog;
pub mod config;
pub mod early_exit;
pub mod keys;
pub mod matcher;
pub mod mix;
pub mod models;
pub mod normalize;
pub mod processor;
pub mod progress;
pub mod queries;
pub mod scoring;
pub mod similarity;
pub mod source;
