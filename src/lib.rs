pub mod cli;
pub mod common;
pub mod downloader;
pub mod parser;
pub mod server;
