//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, limits)
//!     → request.rs (target URL, request origin, upstream headers)
//!     → upstream fetch (reqwest, redirects not followed)
//!     → rewrite:: (headers, cookies, HTML body)
//!     → response.rs (hop-by-hop stripping, assembly)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer, ServerError};
