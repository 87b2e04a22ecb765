pub mod app;
pub mod arxiv;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod store;
pub mod tui;
