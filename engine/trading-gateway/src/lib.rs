//! TradingGateway - authenticated order submission for the CLOB venue
//!
//! The browser never holds venue credentials. This crate keeps a server-side
//! trading session per browser, rebuilds the venue's per-user L2 headers and
//! the service-level builder headers for every outbound order, and refuses any
//! inbound request that tries to smuggle either header set itself.

pub mod builder;
pub mod config;
pub mod error;
pub mod gateway;
pub mod header_guard;
pub mod l2;
pub mod order;
pub mod redact;
pub mod relayer;
pub mod rest_api;
pub mod session;
pub mod signing;
pub mod upstream;

pub use builder::{BuilderCredentials, BuilderHeaderSource, BuilderHeaders, BuilderSigner};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::OrderGateway;
pub use relayer::RelayerProxy;
pub use session::{Session, SessionManager, SessionState, SessionStore};
pub use upstream::{UpstreamClient, UpstreamRequest, UpstreamResponse};

/// Version of the TradingGateway API
pub const VERSION: &str = "0.1.0";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8080;

/// Header-name prefix reserved for server-generated venue credentials
pub const RESERVED_HEADER_PREFIX: &str = "poly_";
