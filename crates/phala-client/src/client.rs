use std::sync::Arc;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use phala_types::{ApiError, CloudError, DiagnosticSink, SchemaError, TracingSink};

use crate::config::ClientConfig;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Handle to the Phala Cloud control plane.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct PhalaCloudClient {
    http: Client,
    config: Arc<ClientConfig>,
    sink: Arc<dyn DiagnosticSink>,
}

impl PhalaCloudClient {
    pub fn new(config: ClientConfig) -> Result<Self, CloudError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CloudError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config: Arc::new(config), sink: Arc::new(TracingSink) })
    }

    pub fn from_env() -> Result<Self, CloudError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Route non-fatal diagnostics (deprecated fields) somewhere other than
    /// the tracing subscriber.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn sink(&self) -> &dyn DiagnosticSink {
        self.sink.as_ref()
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<(StatusCode, Vec<u8>), CloudError> {
        let api_key = self.config.require_api_key()?;
        let url = self.config.endpoint(path);
        debug!(%method, %url, "control plane request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(API_KEY_HEADER, api_key)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(network_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(network_error)?.to_vec();
        if !status.is_success() {
            let err = ApiError::from_body(status.as_u16(), &bytes);
            warn!(%method, path, status = status.as_u16(), detail = %err.detail.summary(), "control plane rejected request");
            return Err(err.into());
        }
        Ok((status, bytes))
    }

    /// Send a request and decode the response into `T`.
    ///
    /// A body that does not match `T` is a [`SchemaError`], never an HTTP
    /// error: the server answered successfully, the shape was wrong.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, CloudError> {
        let (_, bytes) = self.send(method, path, body.as_ref()).await?;
        let bytes = if bytes.is_empty() { b"null".to_vec() } else { bytes };
        serde_json::from_slice(&bytes).map_err(|e| SchemaError::from_serde(path, &e).into())
    }

    /// Send a request and return the response untouched. Empty bodies become
    /// `Value::Null`; non-JSON bodies become a JSON string.
    pub async fn request_raw(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, CloudError> {
        let (_, bytes) = self.send(method, path, body.as_ref()).await?;
        Ok(raw_value(&bytes))
    }

    /// Like [`request_raw`](Self::request_raw) but keeps the status code.
    pub(crate) async fn request_with_status(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(u16, Option<Value>), CloudError> {
        let (status, bytes) = self.send(method, path, body.as_ref()).await?;
        let body = if bytes.is_empty() { None } else { Some(raw_value(&bytes)) };
        Ok((status.as_u16(), body))
    }
}

fn raw_value(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn network_error(err: reqwest::Error) -> CloudError {
    if err.is_timeout() {
        CloudError::Network(format!("request timed out: {}", err))
    } else {
        CloudError::Network(err.to_string())
    }
}

/// Serialize a request body; failures are local schema errors.
pub(crate) fn to_body<B: Serialize + ?Sized>(context: &str, body: &B) -> Result<Value, CloudError> {
    serde_json::to_value(body).map_err(|e| SchemaError::from_serde(context, &e).into())
}
