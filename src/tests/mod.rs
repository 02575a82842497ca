//! Integration tests spanning multiple modules.
//!
//! Unit tests live next to the code they cover. The files here exercise
//! the service registry lifecycle, the ranking pipeline over a live
//! store, and the HTTP contract through the router. Tests that need a
//! model download are marked #[ignore]; run those with:
//! cargo test -- --ignored

mod web;
