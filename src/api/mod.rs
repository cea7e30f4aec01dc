//! HTTP boundary over a shared [`SqliteStore`].
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/health` | Store round trip |
//! | GET | `/api/tables` | List resource names |
//! | GET | `/api/tables/{name}` | List rows, query string as equality filters |
//! | POST | `/api/tables/{name}` | Insert a row |
//! | GET | `/api/tables/{name}/structure` | Column metadata |
//! | GET | `/api/tables/{name}/count` | Row count |
//! | PUT | `/api/tables/{name}/{id}` | Update rows where `id_field = id` |
//! | DELETE | `/api/tables/{name}/{id}` | Delete rows where `id_field = id` |
//! | POST | `/api/query` | Free-form parameterized statement |

pub mod handlers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::Error;
use crate::store::SqliteStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
  pub store: Arc<SqliteStore>,
}

/// Build the complete API router.
pub fn router(store: Arc<SqliteStore>) -> Router {
  let state = ApiState { store };

  let api_routes = Router::new()
    .route("/health", get(handlers::health))
    .route("/tables", get(handlers::list_resources))
    .route(
      "/tables/{name}",
      get(handlers::list_records).post(handlers::insert_record),
    )
    .route("/tables/{name}/structure", get(handlers::structure))
    .route("/tables/{name}/count", get(handlers::count))
    .route(
      "/tables/{name}/{id}",
      put(handlers::update_record).delete(handlers::delete_record),
    )
    .route("/query", post(handlers::execute))
    .with_state(state);

  Router::new()
    .nest("/api", api_routes)
    .layer(CorsLayer::permissive())
}

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Error::Validation(_) => StatusCode::BAD_REQUEST,
      Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
      Error::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!(error = %self, "request failed");
    }
    (status, Json(json!({ "error": self.message() }))).into_response()
  }
}
