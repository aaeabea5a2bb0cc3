//! Worker side of the server: shared listening socket and accept loop.

pub mod listener;
