// gateway/src/dispatch.rs

use chrono::{SecondsFormat, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cancel::CancelSignal,
    config::InactivePolicy,
    conversation::ConversationAllocator,
    error::{DispatchError, InvokeError, RetryClass},
    invoker::{ToolInvoker, ToolReply, ToolRequest},
    profile::Profile,
    registry::{ProfileRegistry, RegistryError},
    retry::{PolicyError, RetryPolicy},
};

/// An authenticated, validated message bound for one profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub caller_id: String,
    pub message: String,
    pub profile_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DispatchMetadata {
    pub profile_id: String,
    /// RFC 3339, UTC, taken at completion.
    pub timestamp: String,
    /// Whole dispatch: every attempt and every backoff wait.
    pub elapsed_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_result: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DispatchResponse {
    pub text: String,
    pub metadata: DispatchMetadata,
    pub conversation_id: String,
}

pub struct DispatchEngine {
    registry: ProfileRegistry,
    invoker: Arc<dyn ToolInvoker>,
    conversations: ConversationAllocator,
    policy: RetryPolicy,
    inactive: InactivePolicy,
}

impl DispatchEngine {
    pub fn new(registry: ProfileRegistry, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            registry,
            invoker,
            conversations: ConversationAllocator::new(),
            policy: RetryPolicy::default(),
            inactive: InactivePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        self.policy = policy;
        Ok(self)
    }
    pub fn with_inactive_policy(mut self, inactive: InactivePolicy) -> Self { self.inactive = inactive; self }

    pub fn registry(&self) -> &ProfileRegistry { &self.registry }
    pub fn policy(&self) -> &RetryPolicy { &self.policy }

    pub async fn dispatch(&self, req: DispatchRequest) -> Result<DispatchResponse, DispatchError> {
        self.dispatch_with_cancel(req, CancelSignal::never()).await
    }

    /// Like [`dispatch`](Self::dispatch), but stops at the next wait once
    /// `cancel` fires. A late upstream reply after cancellation is dropped.
    pub async fn dispatch_with_cancel(
        &self,
        req: DispatchRequest,
        mut cancel: CancelSignal,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = Instant::now();
        let profile = self.resolve(&req.profile_id)?;
        let conversation_id = self.conversations.ensure(req.conversation_id.as_deref());
        info!(caller = %req.caller_id, profile = %profile.id, conversation = %conversation_id, "dispatching message");

        let request = ToolRequest {
            endpoint: profile.endpoint.clone(),
            message: req.message,
            configuration: profile.configuration.clone(),
            conversation_id: conversation_id.clone(),
            caller_id: req.caller_id,
        };
        let (reply, attempts) = self.invoke_with_retry(&profile.id, &request, &mut cancel).await?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(profile = %profile.id, conversation = %conversation_id, attempts, elapsed_ms, "dispatch complete");
        Ok(DispatchResponse {
            text: reply.text,
            metadata: DispatchMetadata {
                profile_id: profile.id.clone(),
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                elapsed_ms,
                attempts,
                structured_result: reply.structured_result,
            },
            conversation_id,
        })
    }

    fn resolve(&self, profile_id: &str) -> Result<Arc<Profile>, DispatchError> {
        match self.registry.resolve(profile_id) {
            Ok(p) if !p.is_active && self.inactive == InactivePolicy::Reject => {
                debug!(profile = %profile_id, "inactive profile rejected");
                Err(DispatchError::ProfileNotFound(profile_id.into()))
            }
            Ok(p) => Ok(p),
            Err(RegistryError::NotFound(_)) => Err(DispatchError::ProfileNotFound(profile_id.into())),
            Err(e) => {
                warn!(profile = %profile_id, error = %e, "registry lookup failed");
                Err(DispatchError::Internal("profile lookup failed".into()))
            }
        }
    }

    async fn invoke_with_retry(
        &self,
        profile_id: &str,
        request: &ToolRequest,
        cancel: &mut CancelSignal,
    ) -> Result<(ToolReply, u32), DispatchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = AssertUnwindSafe(self.invoker.invoke(request)).catch_unwind();
            let call = tokio::time::timeout(self.policy.attempt_timeout, call);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(profile_id, attempt)),
                res = call => match res {
                    Err(_) => Err(InvokeError::Timeout(self.policy.attempt_timeout)),
                    Ok(Ok(out)) => out,
                    Ok(Err(panic)) => {
                        warn!(profile = %profile_id, attempt, panic = panic_message(&*panic), "tool invoker panicked");
                        return Err(DispatchError::Internal("tool invoker panicked".into()));
                    }
                },
            };
            let err = match result {
                Ok(reply) => return Ok((reply, attempt)),
                Err(err) => err,
            };

            let class = err.retry_class();
            if class == RetryClass::Permanent || attempt >= max_attempts {
                warn!(profile = %profile_id, attempt, class = class.as_str(), error = %err, "upstream call failed");
                return Err(DispatchError::from_upstream(profile_id, attempt, &err));
            }

            let delay = self.policy.delay_for(attempt);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            info!(profile = %profile_id, attempt, class = class.as_str(), delay_ms, "retrying upstream call");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(profile_id, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self, profile_id: &str, attempt: u32) -> DispatchError {
        info!(profile = %profile_id, attempt, "dispatch cancelled by caller");
        DispatchError::Cancelled
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::{collections::VecDeque, sync::atomic::{AtomicU32, Ordering}, time::Duration};

    /// Plays back a fixed list of outcomes, each after an optional delay.
    struct Script {
        steps: Mutex<VecDeque<(Duration, Result<ToolReply, InvokeError>)>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(steps: Vec<(Duration, Result<ToolReply, InvokeError>)>) -> Arc<Self> {
            Arc::new(Self { steps: Mutex::new(steps.into()), calls: AtomicU32::new(0) })
        }
    }

    #[async_trait]
    impl ToolInvoker for Script {
        async fn invoke(&self, _request: &ToolRequest) -> Result<ToolReply, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.steps.lock().pop_front();
            match next {
                Some((delay, out)) => {
                    tokio::time::sleep(delay).await;
                    out
                }
                None => Err(InvokeError::Rejected("script exhausted".into())),
            }
        }
    }

    struct Panicking {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolInvoker for Panicking {
        async fn invoke(&self, _request: &ToolRequest) -> Result<ToolReply, InvokeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("invoker bug");
        }
    }

    fn req(profile: &str) -> DispatchRequest {
        DispatchRequest { caller_id: "u1".into(), message: "hello".into(), profile_id: profile.into(), conversation_id: None }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let script = Script::new(vec![(Duration::ZERO, Err(InvokeError::Status { status: 400 }))]);
        let engine = DispatchEngine::new(ProfileRegistry::builtin().unwrap(), script.clone());
        let err = engine.dispatch(req("weather")).await.unwrap_err();
        assert_eq!(err, DispatchError::UpstreamFailure { profile_id: "weather".into(), attempts: 1, status: Some(400) });
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_failure_kind_wins() {
        let script = Script::new(vec![
            (Duration::from_secs(60), Ok(ToolReply::text("late"))),
            (Duration::ZERO, Err(InvokeError::Status { status: 503 })),
            (Duration::ZERO, Err(InvokeError::Connect("refused".into()))),
        ]);
        let engine = DispatchEngine::new(ProfileRegistry::builtin().unwrap(), script.clone());
        let err = engine.dispatch(req("tasks")).await.unwrap_err();
        assert_eq!(err, DispatchError::UpstreamFailure { profile_id: "tasks".into(), attempts: 3, status: None });
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_profile_policy() {
        let registry = ProfileRegistry::builtin().unwrap();
        registry.update("notes", &crate::profile::ProfilePatch { is_active: Some(false), ..Default::default() }).unwrap();

        let script = Script::new(vec![(Duration::ZERO, Ok(ToolReply::text("saved")))]);
        let resolving = DispatchEngine::new(registry.clone(), script.clone());
        assert_eq!(resolving.dispatch(req("notes")).await.unwrap().text, "saved");

        let rejecting = DispatchEngine::new(registry, script.clone()).with_inactive_policy(InactivePolicy::Reject);
        assert_eq!(rejecting.dispatch(req("notes")).await.unwrap_err(), DispatchError::ProfileNotFound("notes".into()));
        assert_eq!(script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn structured_result_lands_in_metadata() {
        let reply = ToolReply { text: "72F".into(), structured_result: Some(serde_json::json!({"temp_f": 72})) };
        let script = Script::new(vec![(Duration::from_millis(5), Ok(reply))]);
        let engine = DispatchEngine::new(ProfileRegistry::builtin().unwrap(), script);
        let mut r = req("weather");
        r.conversation_id = Some("conv_abc".into());
        let resp = engine.dispatch(r).await.unwrap();
        assert_eq!(resp.conversation_id, "conv_abc");
        assert_eq!(resp.metadata.structured_result, Some(serde_json::json!({"temp_f": 72})));
        assert_eq!(resp.metadata.attempts, 1);
        assert!(chrono::DateTime::parse_from_rfc3339(&resp.metadata.timestamp).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn invoker_panic_becomes_internal_error() {
        let invoker = Arc::new(Panicking { calls: AtomicU32::new(0) });
        let engine = Arc::new(DispatchEngine::new(ProfileRegistry::builtin().unwrap(), invoker.clone()));
        let joined = tokio::spawn(async move { engine.dispatch(req("weather")).await }).await;
        let err = joined.expect("dispatch task must not panic").unwrap_err();
        assert!(matches!(err, DispatchError::Internal(_)));
        assert_eq!(err.outcome().status, 500);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_that_cannot_grow_is_refused() {
        let engine = DispatchEngine::new(ProfileRegistry::builtin().unwrap(), Script::new(vec![]));
        let flat = RetryPolicy { factor: 1, ..Default::default() };
        assert!(engine.with_policy(flat).is_err());
    }
}
