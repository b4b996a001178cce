//! Integration tests for minicloud-sync
//!
//! Runs the transfer queues and the sync engine against an in-memory
//! remote that stores files and serves folder listings like the server.

mod common;

mod test_engine;
mod test_queues;
