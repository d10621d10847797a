//! # sigil-api
//!
//! REST layer over the service façade. Every endpoint is a POST carrying the
//! `{"requestObject": …}` envelope and answering `{"status":"OK",
//! "responseObject": …}`; errors come back through the shared error envelope.
//! All business decisions live in `sigil-core` — handlers only translate.

pub mod envelope;
pub mod middleware;
pub mod routes;

use axum::Router;
use sigil_core::Services;
use std::sync::Arc;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(routes::activation::router())
        .merge(routes::signature::router())
        .merge(routes::vault::router())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::integration_auth,
        ));

    Router::new()
        .nest("/rest", api_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
