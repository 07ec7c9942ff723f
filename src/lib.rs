pub mod archive;
pub mod config;
pub mod coordinator;
pub mod dedupe;
pub mod domain;
pub mod download;
pub mod error;
pub mod output;
pub mod watermark;
