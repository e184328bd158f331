pub mod error;
pub mod profile;
pub mod registry;
pub mod conversation;
pub mod retry;
pub mod cancel;
pub mod invoker;
pub mod dispatch;
pub mod config;
pub mod gateway;

pub use error::{DispatchError, ErrorKind, InvokeError, Outcome, RetryClass};
pub use profile::{Profile, ProfilePatch, builtin_profiles};
pub use registry::{ProfileRegistry, RegistryError};
pub use conversation::ConversationAllocator;
pub use retry::{PolicyError, RetryPolicy};
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use invoker::{HttpToolInvoker, ToolInvoker, ToolReply, ToolRequest};
pub use dispatch::{DispatchEngine, DispatchMetadata, DispatchRequest, DispatchResponse};
pub use config::{GatewayConfig, InactivePolicy};
pub use gateway::{Authenticator, ChatRequest, Gateway, GatewayError, GatewayInfo, TokenTable};
