//! Blocking client for the Machines REST API (apps, machines, volumes).
//!
//! # Overview
//! Every remote endpoint maps to one `MachinesClient` method. A call builds
//! an `HttpRequest` from the endpoint's URL template, the client `Config`
//! and any per-call `Overrides`, hands it to a `Transport`, and classifies
//! the result: 2xx is `Ok(Response)`, any other status is
//! `Err(ClientError::Status(Response))`, and a failed exchange is
//! `Err(ClientError::Transport(_))`.
//!
//! # Design
//! - `MachinesClient` holds an immutable `Config`; overrides are merged into
//!   a per-call copy and never written back.
//! - Request building and response classification are pure; the transport
//!   is the only place that touches the network, and the only place that
//!   retries.
//! - Bodies are `serde_json::Value` in both directions. The client does not
//!   validate or type them.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod retry;
pub mod transport;

pub use client::{MachinesClient, WaitParams};
pub use config::{Auth, Config, Overrides, DEFAULT_BASE_URL, LEASE_NONCE_HEADER};
pub use endpoint::{expand_path, Endpoint};
pub use error::{ApiResult, ClientError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, Response};
pub use retry::{Attempt, RetryPolicy};
pub use transport::{Transport, UreqTransport};
