// gateway/src/gateway.rs

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    cancel::CancelSignal,
    dispatch::{DispatchEngine, DispatchRequest, DispatchResponse},
    error::{DispatchError, ErrorKind, Outcome},
    profile::Profile,
    registry::RegistryError,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("access token required")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("profile not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl GatewayError {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::MissingToken => Outcome::new(ErrorKind::Unauthorized, self.to_string()),
            Self::InvalidToken => Outcome::new(ErrorKind::Forbidden, self.to_string()),
            Self::Invalid(_) => Outcome::new(ErrorKind::InvalidRequest, self.to_string()),
            Self::NotFound(_) => Outcome::new(ErrorKind::NotFound, self.to_string()),
            Self::Dispatch(e) => e.outcome(),
        }
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(id),
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Maps an `Authorization` header value to a caller id.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, authorization: Option<&str>) -> Result<String, GatewayError>;
}

/// Static bearer tokens from config.
#[derive(Clone, Debug, Default)]
pub struct TokenTable {
    tokens: BTreeMap<String, String>,
}

impl TokenTable {
    pub fn new(tokens: BTreeMap<String, String>) -> Self { Self { tokens } }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, authorization: Option<&str>) -> Result<String, GatewayError> {
        let token = authorization
            .and_then(|h| h.split_once(' '))
            .map(|(_, t)| t.trim())
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::MissingToken)?;
        self.tokens.get(token).cloned().ok_or(GatewayError::InvalidToken)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub profile_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayInfo {
    pub name: String,
    pub version: String,
    pub active_profiles: usize,
}

/// Boundary in front of the dispatch engine: authentication and request
/// shape checks only.
pub struct Gateway {
    engine: Arc<DispatchEngine>,
    auth: Arc<dyn Authenticator>,
    max_message_chars: usize,
}

impl Gateway {
    pub fn new(engine: Arc<DispatchEngine>, auth: Arc<dyn Authenticator>, max_message_chars: usize) -> Self {
        Self { engine, auth, max_message_chars }
    }

    pub fn engine(&self) -> &Arc<DispatchEngine> { &self.engine }

    pub fn info(&self) -> GatewayInfo {
        GatewayInfo {
            name: "MCP Gateway API".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            active_profiles: self.engine.registry().list_active().len(),
        }
    }

    pub async fn chat(&self, authorization: Option<&str>, req: ChatRequest) -> Result<DispatchResponse, GatewayError> {
        self.chat_with_cancel(authorization, req, CancelSignal::never()).await
    }

    pub async fn chat_with_cancel(
        &self,
        authorization: Option<&str>,
        req: ChatRequest,
        cancel: CancelSignal,
    ) -> Result<DispatchResponse, GatewayError> {
        let caller_id = self.auth.authenticate(authorization)?;
        self.validate(&req)?;
        info!(caller = %caller_id, profile = %req.profile_id, "processing chat message");
        let dispatch = DispatchRequest {
            caller_id,
            message: req.message,
            profile_id: req.profile_id,
            conversation_id: req.conversation_id,
        };
        self.engine.dispatch_with_cancel(dispatch, cancel).await.map_err(|e| {
            warn!(kind = ?e.kind(), "chat failed");
            GatewayError::from(e)
        })
    }

    fn validate(&self, req: &ChatRequest) -> Result<(), GatewayError> {
        if req.profile_id.trim().is_empty() {
            return Err(GatewayError::Invalid("profile_id is required".into()));
        }
        if req.message.trim().is_empty() {
            return Err(GatewayError::Invalid("message is required".into()));
        }
        if req.message.chars().count() > self.max_message_chars {
            return Err(GatewayError::Invalid(format!("message exceeds {} characters", self.max_message_chars)));
        }
        Ok(())
    }

    pub fn profiles(&self, authorization: Option<&str>) -> Result<Vec<Arc<Profile>>, GatewayError> {
        self.auth.authenticate(authorization)?;
        Ok(self.engine.registry().list_active())
    }

    pub fn profile(&self, authorization: Option<&str>, id: &str) -> Result<Arc<Profile>, GatewayError> {
        self.auth.authenticate(authorization)?;
        Ok(self.engine.registry().resolve(id)?)
    }

    pub fn capabilities(&self, authorization: Option<&str>, id: &str) -> Result<Vec<String>, GatewayError> {
        self.auth.authenticate(authorization)?;
        Ok(self.engine.registry().capabilities_of(id)?)
    }
}
