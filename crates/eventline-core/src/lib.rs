//! # eventline-core
//!
//! Foundation types, errors, backoff math and logging for eventline.
//!
//! This crate provides the shared vocabulary the client and the CLI depend on:
//!
//! - **Stream events**: [`StreamEvent`] and [`ConnectionState`]
//! - **Errors**: [`StreamError`] taxonomy via `thiserror`
//! - **Retry**: [`ReconnectPolicy`] exponential backoff with jitter
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod logging;
pub mod retry;

pub use errors::StreamError;
pub use events::{ConnectionState, StreamEvent, WILDCARD_EVENT_TYPE};
pub use retry::ReconnectPolicy;
