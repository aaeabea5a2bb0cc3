//! Legacy hash router.
//!
//! Picks a backend for a client by hashing the client's address. It is a
//! standalone tool and is not wired into the static file server.

pub mod backend;
pub mod router;

pub use backend::{hash_address, Backend, BackendSelector, SelectorError};
