//! REST API handlers.
//!
//! Each handler delegates to the store and returns JSON. Path and query
//! values arrive as text and are bound as text.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::{Filters, Params, Record, Value};
use crate::store::{ColumnInfo, Outcome, ResourceAccess, DEFAULT_ID_FIELD};

use super::ApiState;

/// JSON body whose rejections come back as `{error}` with status 400,
/// like every other validation failure.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
  Json<T>: FromRequest<S, Rejection = JsonRejection>,
  S: Send + Sync,
{
  type Rejection = Error;

  async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Error> {
    match Json::<T>::from_request(req, state).await {
      Ok(Json(value)) => Ok(Self(value)),
      Err(rejection) => Err(Error::validation(rejection.body_text())),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct IdField {
  id_field: Option<String>,
}

impl IdField {
  fn name(&self) -> &str {
    self
      .id_field
      .as_deref()
      .filter(|f| !f.is_empty())
      .unwrap_or(DEFAULT_ID_FIELD)
  }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
  query: Option<String>,
  #[serde(default)]
  params: Params,
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/health
pub async fn health(State(state): State<ApiState>) -> Response {
  match state.store.health().await {
    Ok(()) => Json(json!({
      "status": "connected",
      "database": state.store.database(),
      "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response(),
    Err(e) => (
      StatusCode::INTERNAL_SERVER_ERROR,
      Json(json!({
        "status": "disconnected",
        "error": e.message(),
      })),
    )
      .into_response(),
  }
}

// ── Metadata ───────────────────────────────────────────────────

/// GET /api/tables
pub async fn list_resources(State(state): State<ApiState>) -> Result<Json<Vec<String>>> {
  Ok(Json(state.store.resources().await?))
}

/// GET /api/tables/{name}/structure
pub async fn structure(
  State(state): State<ApiState>,
  Path(name): Path<String>,
) -> Result<Json<Vec<ColumnInfo>>> {
  Ok(Json(state.store.structure(&name).await?))
}

/// GET /api/tables/{name}/count
pub async fn count(
  State(state): State<ApiState>,
  Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
  let count = state.store.count(&name).await?;
  Ok(Json(json!({ "count": count })))
}

// ── Records ────────────────────────────────────────────────────

/// GET /api/tables/{name}
pub async fn list_records(
  State(state): State<ApiState>,
  Path(name): Path<String>,
  Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Record>>> {
  let filters: Filters = query.into_iter().collect();
  debug!(resource = %name, filters = filters.len(), "list");
  Ok(Json(state.store.list(&name, &filters).await?))
}

/// POST /api/tables/{name}
pub async fn insert_record(
  State(state): State<ApiState>,
  Path(name): Path<String>,
  ApiJson(record): ApiJson<Record>,
) -> Result<(StatusCode, Json<Outcome>)> {
  let outcome = state.store.insert(&name, &record).await?;
  Ok((StatusCode::CREATED, Json(outcome)))
}

/// PUT /api/tables/{name}/{id}
pub async fn update_record(
  State(state): State<ApiState>,
  Path((name, id)): Path<(String, String)>,
  Query(id_field): Query<IdField>,
  ApiJson(record): ApiJson<Record>,
) -> Result<Json<Outcome>> {
  let outcome = state
    .store
    .update(&name, &Value::Text(id), &record, id_field.name())
    .await?;
  Ok(Json(outcome))
}

/// DELETE /api/tables/{name}/{id}
pub async fn delete_record(
  State(state): State<ApiState>,
  Path((name, id)): Path<(String, String)>,
  Query(id_field): Query<IdField>,
) -> Result<Json<Outcome>> {
  let outcome = state
    .store
    .delete(&name, &Value::Text(id), id_field.name())
    .await?;
  Ok(Json(outcome))
}

// ── Free-form ──────────────────────────────────────────────────

/// POST /api/query
pub async fn execute(
  State(state): State<ApiState>,
  ApiJson(request): ApiJson<QueryRequest>,
) -> Result<Json<Vec<Record>>> {
  let query = request
    .query
    .filter(|q| !q.trim().is_empty())
    .ok_or_else(|| Error::validation("Query parameter is required"))?;
  Ok(Json(state.store.execute(&query, &request.params).await?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::router;
  use crate::store::SqliteStore;
  use axum::body::{to_bytes, Body};
  use axum::http::Request;
  use axum::Router;
  use std::sync::Arc;
  use tower::ServiceExt;

  async fn app() -> (Router, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store
      .execute_batch(
        "CREATE TABLE Properties (
           property_id TEXT PRIMARY KEY,
           address TEXT NOT NULL,
           price INTEGER,
           status TEXT);
         INSERT INTO Properties VALUES
           ('P001', '9 Birch', 250000, 'Available'),
           ('P002', '4 Elm', 310000, 'Sold');",
      )
      .await
      .unwrap();
    (router(Arc::clone(&store)), store)
  }

  async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
      serde_json::Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
  }

  fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
  }

  fn with_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
      .method(method)
      .uri(uri)
      .header("content-type", "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  #[tokio::test]
  async fn test_health_reports_database() {
    let (app, store) = app().await;
    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(body["database"], "memory");

    store.shutdown().await.unwrap();
    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "disconnected");
  }

  #[tokio::test]
  async fn test_list_with_filters() {
    let (app, _) = app().await;
    let (status, body) = send(&app, get("/api/tables/Properties?status=Sold")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["property_id"], "P002");
    assert_eq!(rows[0]["price"], 310000);
  }

  #[tokio::test]
  async fn test_insert_then_list() {
    let (app, _) = app().await;
    let (status, body) = send(
      &app,
      with_json(
        "POST",
        "/api/tables/Properties",
        json!({
          "property_id": "P003",
          "address": "123 Oak",
          "price": 450000,
          "status": "Available"
        }),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app, get("/api/tables/Properties?status=Available")).await;
    let addresses: Vec<_> = body
      .as_array()
      .unwrap()
      .iter()
      .map(|r| r["address"].as_str().unwrap().to_string())
      .collect();
    assert!(addresses.contains(&"123 Oak".to_string()));
  }

  #[tokio::test]
  async fn test_update_and_delete_by_id_field() {
    let (app, _) = app().await;
    let (status, body) = send(
      &app,
      with_json(
        "PUT",
        "/api/tables/Properties/P001?id_field=property_id",
        json!({"status": "Sold"}),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows_affected"], 1);

    let (_, body) = send(&app, get("/api/tables/Properties?property_id=P001")).await;
    assert_eq!(body[0]["status"], "Sold");

    let delete = || {
      Request::delete("/api/tables/Properties/P001?id_field=property_id")
        .body(Body::empty())
        .unwrap()
    };
    let (_, body) = send(&app, delete()).await;
    assert_eq!(body["success"], true);
    let (status, body) = send(&app, delete()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No record found");
  }

  #[tokio::test]
  async fn test_unknown_identifiers_are_bad_requests() {
    let (app, _) = app().await;
    let (status, body) = send(&app, get("/api/tables/Nope")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, get("/api/tables/Properties?bogus=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Default id field does not exist on this table
    let (status, _) = send(
      &app,
      Request::delete("/api/tables/Properties/P001")
        .body(Body::empty())
        .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn test_empty_insert_is_rejected() {
    let (app, _) = app().await;
    let (status, _) = send(
      &app,
      with_json("POST", "/api/tables/Properties", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn test_store_rejection_is_server_error() {
    let (app, _) = app().await;
    let (status, body) = send(
      &app,
      with_json(
        "POST",
        "/api/tables/Properties",
        json!({"property_id": "P001", "address": "dup"}),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("UNIQUE"));
  }

  #[tokio::test]
  async fn test_metadata_routes() {
    let (app, _) = app().await;
    let (_, body) = send(&app, get("/api/tables")).await;
    assert_eq!(body, json!(["Properties"]));

    let (_, body) = send(&app, get("/api/tables/Properties/structure")).await;
    assert_eq!(body[0]["name"], "property_id");
    assert_eq!(body[0]["primary_key"], true);

    let (_, body) = send(&app, get("/api/tables/Properties/count")).await;
    assert_eq!(body["count"], 2);
  }

  #[tokio::test]
  async fn test_free_form_query() {
    let (app, _) = app().await;
    let (status, body) = send(
      &app,
      with_json(
        "POST",
        "/api/query",
        json!({
          "query": "SELECT address FROM Properties WHERE price > @min",
          "params": {"min": 300000}
        }),
      ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"address": "4 Elm"}]));

    let (status, body) = send(&app, with_json("POST", "/api/query", json!({"query": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Query parameter is required");
  }

  #[tokio::test]
  async fn test_unreadable_bodies_are_bad_requests() {
    let (app, _) = app().await;
    let malformed = Request::post("/api/tables/Properties")
      .header("content-type", "application/json")
      .body(Body::from("{\"property_id\": "))
      .unwrap();
    let (status, body) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let untyped = Request::post("/api/query")
      .body(Body::from(r#"{"query": "SELECT 1"}"#))
      .unwrap();
    let (status, body) = send(&app, untyped).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Content-Type"));

    let (status, body) = send(
      &app,
      with_json("PUT", "/api/tables/Properties/P001", json!(["not", "a", "record"])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
  }

  #[tokio::test]
  async fn test_shut_down_store_is_unavailable() {
    let (app, store) = app().await;
    store.shutdown().await.unwrap();
    let (status, _) = send(&app, get("/api/tables")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  }
}
