//! Generic API structures and handlers
//!
//! This module contains the warp server, the response envelope, and the
//! handlers that bridge HTTP requests into the orchestrator and record
//! store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use warp::http::{Method, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::orchestrator::{Orchestrator, PaymentRequest, RequestAction};
use crate::store::{ListFilter, PaymentStatus, PaymentStore};

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body of `POST /payments`; the action is implied by the route.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentBody {
    /// Amount in token units
    pub amount: f64,
    /// Token symbol
    pub token: String,
    /// Chain the user wants to pay on
    pub chain: String,
    /// Business id the command addresses (optional)
    #[serde(default)]
    pub business: Option<String>,
    /// Whether an installment plan was requested
    #[serde(default)]
    pub emi: bool,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn create_payment_handler(
    body: CreatePaymentBody,
    orchestrator: Arc<Orchestrator>,
) -> Result<impl Reply, Rejection> {
    let request = PaymentRequest {
        action: RequestAction::CreatePaymentLink,
        amount: body.amount,
        token: body.token,
        chain: body.chain,
        payment_id: None,
        business: body.business,
        emi: body.emi,
    };
    match orchestrator.handle(request).await {
        Ok(response) => Ok(warp::reply::json(&ApiResponse::ok(response))),
        Err(e) => {
            error!("create_payment failed: {:#}", e);
            Err(warp::reject::custom(InternalError(e.to_string())))
        }
    }
}

async fn check_payment_handler(
    payment_id: String,
    orchestrator: Arc<Orchestrator>,
) -> Result<impl Reply, Rejection> {
    match orchestrator.check_payment(&payment_id) {
        Ok(response) => Ok(warp::reply::json(&ApiResponse::ok(response))),
        Err(e) => {
            error!("check_payment failed: {:#}", e);
            Err(warp::reject::custom(InternalError(e.to_string())))
        }
    }
}

async fn list_payments_handler(
    query: HashMap<String, String>,
    orchestrator: Arc<Orchestrator>,
) -> Result<impl Reply, Rejection> {
    let status = match query.get("status") {
        Some(raw) => Some(parse_status(raw).map_err(|e| warp::reject::custom(BadRequest(e)))?),
        None => None,
    };
    let filter = ListFilter {
        status,
        business_id: query.get("business_id").cloned(),
        limit: query
            .get("limit")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0),
    };
    match orchestrator.list_payments(&filter) {
        Ok(response) => Ok(warp::reply::json(&ApiResponse::ok(response))),
        Err(e) => {
            error!("list_payments failed: {:#}", e);
            Err(warp::reject::custom(InternalError(e.to_string())))
        }
    }
}

async fn drain_notifications_handler(store: PaymentStore) -> Result<impl Reply, Rejection> {
    match store.drain_notifications() {
        Ok(notifications) => Ok(warp::reply::json(&ApiResponse::ok(notifications))),
        Err(e) => {
            error!("drain_notifications failed: {:#}", e);
            Err(warp::reject::custom(InternalError(e.to_string())))
        }
    }
}

fn parse_status(raw: &str) -> Result<PaymentStatus, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("Unknown status '{}'", raw))
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

fn with_orchestrator(
    orchestrator: Arc<Orchestrator>,
) -> impl Filter<Extract = (Arc<Orchestrator>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || orchestrator.clone())
}

fn with_store(
    store: PaymentStore,
) -> impl Filter<Extract = (PaymentStore,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || store.clone())
}

// ============================================================================
// CUSTOM REJECTION TYPES
// ============================================================================

/// Custom rejection for malformed requests
#[derive(Debug)]
struct BadRequest(String);

impl warp::reject::Reject for BadRequest {}

/// Custom rejection for handler failures
#[derive(Debug)]
struct InternalError(String);

impl warp::reject::Reject for InternalError {}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    if allowed_origins.contains(&"*".to_string()) {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Global rejection handler for all API routes.
async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if let Some(err) = rej.find::<BadRequest>() {
        (StatusCode::BAD_REQUEST, err.0.clone())
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", err))
    } else if let Some(err) = rej.find::<InternalError>() {
        (StatusCode::INTERNAL_SERVER_ERROR, err.0.clone())
    } else if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// REST API server for the payment service.
pub struct ApiServer {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    store: PaymentStore,
}

impl ApiServer {
    /// Creates a new API server with the given components.
    pub fn new(config: Arc<Config>, orchestrator: Orchestrator, store: PaymentStore) -> Self {
        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            store,
        }
    }

    /// Starts the API server and begins handling HTTP requests.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            self.config.api.host, self.config.api.port
        );

        let routes = self.create_routes();

        let addr: std::net::SocketAddr =
            format!("{}:{}", self.config.api.host, self.config.api.port)
                .parse()
                .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;

        Ok(())
    }

    /// Returns the route tree for in-process testing with `warp::test`.
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }

    /// Creates all API routes for the server.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
        let orchestrator = self.orchestrator.clone();
        let store = self.store.clone();

        // Health check endpoint - returns service status
        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String>::ok(
                "Payment service is running".to_string(),
            ))
        });

        // POST /payments - create a payment and start its monitor
        let create_payment = warp::path("payments")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and(with_orchestrator(orchestrator.clone()))
            .and_then(create_payment_handler);

        // GET /payments/:id - read one payment record
        let check_payment = warp::path("payments")
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::get())
            .and(with_orchestrator(orchestrator.clone()))
            .and_then(check_payment_handler);

        // GET /payments?status=&business_id=&limit= - bounded listing
        let list_payments = warp::path("payments")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::query::<HashMap<String, String>>())
            .and(with_orchestrator(orchestrator))
            .and_then(list_payments_handler);

        // POST /notifications/drain - consume pending notifications
        let drain_notifications = warp::path("notifications")
            .and(warp::path("drain"))
            .and(warp::path::end())
            .and(warp::post())
            .and(with_store(store))
            .and_then(drain_notifications_handler);

        let cors = create_cors_filter(&self.config.api.cors_origins).build();

        health
            .or(create_payment)
            .or(check_payment)
            .or(list_payments)
            .or(drain_notifications)
            .with(cors)
            .recover(handle_rejection)
    }
}
