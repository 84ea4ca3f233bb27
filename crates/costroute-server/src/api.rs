//! Caller-facing HTTP API
//!
//! - `POST /generate` - route a prompt to the cheapest healthy provider
//! - `GET /stats` - aggregate usage and the most recent attempts
//! - `GET /providers` - pricing and circuit breaker state per provider

use crate::bootstrap::Services;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use costroute_core::{AttemptFailure, Error, GenerationOutcome, GenerationRequest};
use costroute_observability::{ProviderReadiness, ReadinessChecker};
use costroute_routing::{CircuitState, ProviderStatus};
use costroute_usage::UsageReport;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<Vec<AttemptFailure>>,
}

/// Routing error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::AllProvidersUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::AllProvidersFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let failures = match &self.0 {
            Error::AllProvidersFailed { failures } => Some(failures.clone()),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.0.kind(),
                message: self.0.to_string(),
                failures,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Create the API router
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/stats", get(stats))
        .route("/providers", get(providers))
        .with_state(state)
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<GenerationOutcome>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| Error::InvalidRequest(rejection.body_text()))?;

    let services = state.services();
    let start = Instant::now();
    let result = services.router.generate(request).await;
    let elapsed = start.elapsed().as_secs_f64();

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    services.metrics.record_request(outcome, elapsed);
    services.refresh_circuit_gauges();

    match result {
        Ok(outcome) => {
            tracing::info!(
                provider = %outcome.provider_used,
                cost = outcome.cost,
                total_tokens = outcome.total_tokens,
                "Request served"
            );
            Ok(Json(outcome))
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "Request failed");
            Err(e.into())
        }
    }
}

async fn stats(State(state): State<AppState>) -> Json<UsageReport> {
    Json(state.services().stats.report())
}

async fn providers(State(state): State<AppState>) -> Json<Vec<ProviderStatus>> {
    Json(state.services().router.provider_statuses())
}

/// Readiness backed by the Router's circuit breakers
pub struct RouterReadiness {
    router: Arc<costroute_routing::Router>,
}

impl RouterReadiness {
    pub fn new(router: Arc<costroute_routing::Router>) -> Self {
        Self { router }
    }
}

impl ReadinessChecker for RouterReadiness {
    fn is_ready(&self) -> bool {
        self.router.health().any_available()
    }

    fn provider_statuses(&self) -> Vec<ProviderReadiness> {
        self.router
            .provider_statuses()
            .into_iter()
            .map(|status| {
                let available = self
                    .router
                    .health()
                    .breaker(&status.name)
                    .is_some_and(|breaker| breaker.is_available());
                let circuit = match status.health.state {
                    CircuitState::Closed => "closed",
                    CircuitState::Open => "open",
                    CircuitState::HalfOpen => "half_open",
                };
                ProviderReadiness {
                    name: status.name,
                    circuit: circuit.to_string(),
                    available,
                }
            })
            .collect()
    }
}
