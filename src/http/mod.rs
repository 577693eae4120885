//! HTTP transactions on top of the session layer.
//!
//! - [`transaction`]: one request, over HTTP/2 or the HTTP/1.1 fallback
//! - [`retry`]: which failures are replayed, and when
//! - [`serverproperties`]: servers and proxies known to require HTTP/1.1

pub mod fallback;
pub mod networksession;
pub mod request;
pub mod response;
pub mod retry;
pub mod serverproperties;
pub mod transaction;

// Re-exports for convenience
pub use fallback::Http11Fallback;
pub use networksession::HttpNetworkSession;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use serverproperties::HttpServerProperties;
pub use transaction::HttpNetworkTransaction;
