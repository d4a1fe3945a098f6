//! Purpose: Blocking client library for the VRChat web API.
//! Exports: `api` (client, auth, proxies, paging) and `core` (errors, payloads, cache).
//! Role: Session/request layer with an identity-mapped entity cache.
//! Invariants: No process-wide state; each `Client` owns its session and cache.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;

pub use api::{Client, ClientConfig, Credentials, Error, ErrorKind};
