pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod merge;
pub mod output;
pub mod package;
pub mod store;
pub mod tui;
