//! REST API Server Module
//!
//! This module provides the REST surface of the payment service: payment
//! creation, status checks, bounded listing, and the notification drain
//! used by the chat front-end.

mod generic;

// Re-export ApiServer for convenience
pub use generic::ApiServer;
// Re-export ApiResponse for testing
#[allow(unused_imports)]
pub use generic::ApiResponse;
