//! Mutating Admission Webhook for secretsbeam
//!
//! The API server sends an AdmissionReview for every Pod and ServiceAccount
//! create/update matched by the webhook configuration. Each endpoint hands the
//! object to its mutator and answers with the resulting JSON patch.

pub mod handler;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use crate::mutator::Mutator;

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Mutator behind `POST /pods`
    pub pods: Arc<dyn Mutator>,
    /// Mutator behind `POST /serviceaccounts`
    pub service_accounts: Arc<dyn Mutator>,
}

impl WebhookState {
    /// Create webhook state from the two mutators
    pub fn new(pods: Arc<dyn Mutator>, service_accounts: Arc<dyn Mutator>) -> Self {
        Self {
            pods,
            service_accounts,
        }
    }
}

/// Create the webhook router with all mutation endpoints
///
/// - POST /pods - inject secret agents into Pods
/// - POST /serviceaccounts - copy provider annotations onto ServiceAccounts
/// - GET /healthz - liveness, always `204 No Content`
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/pods", post(handler::mutate_pods))
        .route("/serviceaccounts", post(handler::mutate_service_accounts))
        .route("/healthz", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}
