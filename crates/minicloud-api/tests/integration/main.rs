//! Integration tests for minicloud-api
//!
//! Uses wiremock to simulate a Minicloud server and verifies actions,
//! reply dispatch, uploads and downloads end to end.

mod common;

mod test_actions;
