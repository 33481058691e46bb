//! 处理器：指令文本、能力集与统一的调用契约

pub mod handler;
pub mod prompts;

pub use handler::{default_capabilities, HandlerProfile, HandlerSet};
pub use prompts::{default_instructions, load_instructions, CLOSING_MESSAGE, GREETING};
