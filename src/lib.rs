//! prefork_httpd - Pre-fork static file server
//!
//! Core library for the master/worker supervisor, the per-connection HTTP
//! pipeline and the legacy hash-based backend router.

pub mod config;
pub mod files;
pub mod http;
pub mod proxy;
pub mod server;
pub mod supervisor;
