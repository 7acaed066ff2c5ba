//! # eventline-client
//!
//! Reconnecting server-sent-events client.
//!
//! - [`StreamConnector`]: connection lifecycle, dedup, buffering, dispatch
//! - [`sse`]: incremental frame decoder
//! - [`transport`]: the network seam and its `reqwest` implementation
//! - [`buffer`]: seen-id set and bounded recent-event buffer
//! - [`registry`]: typed and wildcard listeners
//! - [`connectivity`]: connectivity-restored signalling

#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod connectivity;
pub mod connector;
pub mod registry;
pub mod sse;
pub mod transport;

pub use buffer::BufferedEvent;
pub use config::ConnectorConfig;
pub use connectivity::{ConnectivityNotifier, ConnectivitySignal};
pub use connector::StreamConnector;
pub use registry::Subscription;
pub use transport::{ByteStream, ReqwestTransport, Transport, TransportRequest};
