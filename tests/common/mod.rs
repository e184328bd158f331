#![allow(dead_code)]

use async_trait::async_trait;
use mcp_gateway::{InvokeError, ToolInvoker, ToolReply, ToolRequest};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

/// What one scripted attempt does.
#[derive(Clone, Debug)]
pub enum Step {
    Reply(Duration, String),
    Fail(Duration, InvokeError),
    /// Never answers; the engine's deadline has to fire.
    Hang,
}

/// Fake tool server: plays `steps` in order, then repeats `fallback`.
pub struct ScriptedInvoker {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicU32,
    seen: Mutex<Vec<ToolRequest>>,
}

impl ScriptedInvoker {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn always(step: Step) -> Arc<Self> { Self::new(vec![], step) }

    pub fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
    pub fn requests(&self) -> Vec<ToolRequest> { self.seen.lock().clone() }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &ToolRequest) -> Result<ToolReply, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        let step = self.steps.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(ToolReply::text(text))
            }
            Step::Fail(delay, err) => {
                tokio::time::sleep(delay).await;
                Err(err)
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn ok(text: &str) -> Step { Step::Reply(Duration::ZERO, text.to_string()) }
pub fn server_error() -> Step { Step::Fail(Duration::ZERO, InvokeError::Status { status: 503 }) }
