use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{header::HeaderMap, header::HeaderValue, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{ControlPlane, ControlPlaneConnector, ControlPlaneError, NodeInfo, PeerInfo};
use crate::backend::PortBinding;

/// Upper bound on a single call, connect included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// JSON-RPC 2.0 client for a node's HTTP endpoint
#[derive(Debug)]
pub struct JsonRpcClient {
    remote: Url,
    client: Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(remote: &Url) -> Result<Self, ControlPlaneError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    async fn raw_call(&self, method: &str, params: Value) -> Result<Option<Value>, ControlPlaneError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::trace!("rpc call {} to {}", method, self.remote);
        let response: Response = self
            .client
            .post(self.remote.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ControlPlaneError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    /// Call `method` and decode a non-null result
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ControlPlaneError> {
        match self.raw_call(method, params).await? {
            Some(Value::Null) | None => Err(ControlPlaneError::EmptyResult(method.to_string())),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }
}

#[async_trait::async_trait]
impl ControlPlane for JsonRpcClient {
    async fn peers(&self) -> Result<Vec<PeerInfo>, ControlPlaneError> {
        match self.raw_call("admin_peers", Value::Array(vec![])).await? {
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    async fn node_info(&self) -> Result<NodeInfo, ControlPlaneError> {
        self.call("admin_nodeInfo", Value::Array(vec![])).await
    }

    async fn request_all_history(&self) -> Result<(), ControlPlaneError> {
        self.raw_call("ssm_requestAll", serde_json::json!([true]))
            .await?;
        Ok(())
    }

    async fn raw_metrics(&self) -> Result<Vec<u8>, ControlPlaneError> {
        let metrics: Value = self.call("debug_metrics", serde_json::json!([true])).await?;
        Ok(serde_json::to_vec(&metrics)?)
    }
}

/// Connects to nodes over plain HTTP on their published RPC port
#[derive(Debug, Clone, Default)]
pub struct JsonRpcConnector;

impl JsonRpcConnector {
    /// URL for a host binding; wildcard hosts are reached over loopback
    pub fn url_for(binding: &PortBinding) -> Result<Url, ControlPlaneError> {
        let host = match binding.host_ip.as_str() {
            "" | "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
            host => host,
        };
        Ok(Url::parse(&format!("http://{}:{}", host, binding.host_port))?)
    }
}

#[async_trait::async_trait]
impl ControlPlaneConnector for JsonRpcConnector {
    async fn connect(
        &self,
        binding: &PortBinding,
    ) -> Result<Arc<dyn ControlPlane>, ControlPlaneError> {
        let url = Self::url_for(binding)?;
        tracing::debug!("init rpc client at {}", url);
        Ok(Arc::new(JsonRpcClient::new(&url)?))
    }
}
