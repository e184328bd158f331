// gateway/src/invoker.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::InvokeError;

/// One call to a profile's remote tool server.
#[derive(Clone, Debug, Serialize)]
pub struct ToolRequest {
    pub endpoint: String,
    pub message: String,
    pub configuration: BTreeMap<String, Value>,
    pub conversation_id: String,
    pub caller_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<Value>,
}

impl ToolReply {
    pub fn text(text: impl Into<String>) -> Self { Self { text: text.into(), structured_result: None } }
}

/// Transport seam between the dispatch engine and remote tool servers.
/// Implementations report one attempt; deadlines and retries belong to the
/// caller.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, request: &ToolRequest) -> Result<ToolReply, InvokeError>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    message: &'a str,
    configuration: &'a BTreeMap<String, Value>,
    conversation_id: &'a str,
}

/// JSON over HTTP: POST `{message, configuration, conversation_id}` to the
/// profile endpoint, expect `{text, structured_result?}` back. The
/// conversation id is mirrored into `x-conversation-id` when it is a legal
/// header value.
#[derive(Clone)]
pub struct HttpToolInvoker {
    client: reqwest::Client,
}

impl HttpToolInvoker {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mcp-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self { Self { client } }
}

#[async_trait]
impl ToolInvoker for HttpToolInvoker {
    async fn invoke(&self, request: &ToolRequest) -> Result<ToolReply, InvokeError> {
        let body = WireRequest {
            message: &request.message,
            configuration: &request.configuration,
            conversation_id: &request.conversation_id,
        };
        let mut builder = self.client.post(&request.endpoint).json(&body);
        if let Ok(value) = HeaderValue::from_str(&request.conversation_id) {
            builder = builder.header("x-conversation-id", value);
        }
        let resp = builder.send().await.map_err(classify_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(InvokeError::Status { status: status.as_u16() });
        }
        resp.json::<ToolReply>().await.map_err(|e| InvokeError::Malformed(e.to_string()))
    }
}

fn classify_send_error(err: reqwest::Error) -> InvokeError {
    if err.is_builder() {
        // bad endpoint url; retrying cannot help
        InvokeError::Rejected(err.to_string())
    } else {
        InvokeError::Connect(err.to_string())
    }
}
