//! Resource access over the HTTP boundary.
//!
//! Lets a client process use the cache layer against a store owned by
//! another process, through the same `/api` surface the server exposes.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::{Filters, Params, Record, Value};

use super::{ColumnInfo, Outcome, ResourceAccess};

/// HTTP client for a remote store.
#[derive(Clone)]
pub struct RemoteStore {
  client: Client,
  base: Url,
  credentials: Option<(String, String)>,
}

#[derive(Deserialize)]
struct ErrorBody {
  error: String,
}

#[derive(Deserialize)]
struct CountBody {
  count: u64,
}

#[derive(Serialize)]
struct QueryBody<'a> {
  query: &'a str,
  params: &'a Params,
}

impl RemoteStore {
  /// Build a client for [`Config::remote_url`]. From the store options,
  /// `trust_server_certificate` accepts self-signed certificates and the
  /// credential pair is sent as basic auth.
  pub fn from_config(config: &Config) -> Result<Self> {
    let base = Url::parse(&config.remote_url())
      .map_err(|e| Error::connection(format!("Invalid server address: {}", e)))?;
    let config = &config.store;

    let mut builder = Client::builder()
      .timeout(config.timeout())
      .danger_accept_invalid_certs(config.trust_server_certificate);
    if config.keep_alive {
      builder = builder.tcp_keepalive(Some(config.keep_alive_interval()));
    }
    let client = builder
      .build()
      .map_err(|e| Error::connection(format!("Failed to create HTTP client: {}", e)))?;

    let credentials = if config.user.is_empty() {
      None
    } else {
      Some((config.user.clone(), config.password.clone()))
    };

    Ok(Self {
      client,
      base,
      credentials,
    })
  }

  /// Client for an explicit base URL, without credentials.
  pub fn new(base: Url) -> Self {
    Self {
      client: Client::new(),
      base,
      credentials: None,
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| Error::connection(format!("{} cannot be used as a base URL", self.base)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.credentials {
      Some((user, password)) => request.basic_auth(user, Some(password)),
      None => request,
    }
  }

  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
    let response = self.authorize(request).send().await?;
    read_response(response).await
  }
}

/// Map an HTTP response back onto the error taxonomy.
async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T> {
  let status = response.status();
  if status.is_success() {
    return Ok(response.json().await?);
  }

  let message = response
    .json::<ErrorBody>()
    .await
    .map(|body| body.error)
    .unwrap_or_else(|_| status.to_string());

  Err(match status {
    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::Validation(message),
    StatusCode::SERVICE_UNAVAILABLE => Error::Connection(message),
    _ => Error::Store(message),
  })
}

/// Render a value for a URL. Booleans go over as 0/1, which is how the
/// store holds them.
fn url_value(value: &Value) -> Result<String> {
  match value {
    Value::Null => Err(Error::validation(
      "null values cannot be sent as URL parameters",
    )),
    Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
    other => Ok(other.to_string()),
  }
}

impl ResourceAccess for RemoteStore {
  async fn list(&self, resource: &str, filters: &Filters) -> Result<Vec<Record>> {
    let query = filters
      .iter()
      .map(|(field, value)| Ok((field.to_string(), url_value(value)?)))
      .collect::<Result<Vec<_>>>()?;

    debug!(resource, filters = query.len(), "remote list");
    let url = self.endpoint(&["api", "tables", resource])?;
    self.send(self.client.get(url).query(&query)).await
  }

  async fn insert(&self, resource: &str, record: &Record) -> Result<Outcome> {
    if record.is_empty() {
      return Err(Error::validation(format!(
        "cannot insert an empty record into {}",
        resource
      )));
    }

    let url = self.endpoint(&["api", "tables", resource])?;
    self.send(self.client.post(url).json(record)).await
  }

  async fn update(
    &self,
    resource: &str,
    id: &Value,
    record: &Record,
    id_field: &str,
  ) -> Result<Outcome> {
    if record.is_empty() {
      return Err(Error::validation(format!(
        "cannot update {} with an empty record",
        resource
      )));
    }

    let id = url_value(id)?;
    let url = self.endpoint(&["api", "tables", resource, id.as_str()])?;
    let request = self
      .client
      .put(url)
      .query(&[("id_field", id_field)])
      .json(record);
    self.send(request).await
  }

  async fn delete(&self, resource: &str, id: &Value, id_field: &str) -> Result<Outcome> {
    let id = url_value(id)?;
    let url = self.endpoint(&["api", "tables", resource, id.as_str()])?;
    self
      .send(self.client.delete(url).query(&[("id_field", id_field)]))
      .await
  }

  async fn count(&self, resource: &str) -> Result<u64> {
    let url = self.endpoint(&["api", "tables", resource, "count"])?;
    let body: CountBody = self.send(self.client.get(url)).await?;
    Ok(body.count)
  }

  async fn execute(&self, statement: &str, params: &Params) -> Result<Vec<Record>> {
    let url = self.endpoint(&["api", "query"])?;
    let body = QueryBody {
      query: statement,
      params,
    };
    self.send(self.client.post(url).json(&body)).await
  }

  async fn resources(&self) -> Result<Vec<String>> {
    let url = self.endpoint(&["api", "tables"])?;
    self.send(self.client.get(url)).await
  }

  async fn structure(&self, resource: &str) -> Result<Vec<ColumnInfo>> {
    let url = self.endpoint(&["api", "tables", resource, "structure"])?;
    self.send(self.client.get(url)).await
  }

  async fn health(&self) -> Result<()> {
    let url = self.endpoint(&["api", "health"])?;
    let _: serde_json::Value = self.send(self.client.get(url)).await?;
    Ok(())
  }
}
