//! 核心编排层：错误、会话状态、分派、路由、主控循环

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod router;
pub mod state;

pub use dispatcher::dispatch;
pub use error::AgentError;
pub use orchestrator::{Orchestrator, PassOutcome, DEFAULT_MAX_STEPS};
pub use router::{route, route_after_tools, AfterTools, Route, RoutingRules};
pub use state::{ConversationState, HandlerKind, VerificationEffect};
