pub mod app;
pub mod config;
pub mod csv;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod reconcile;
pub mod remote;
pub mod source;
pub mod store;
