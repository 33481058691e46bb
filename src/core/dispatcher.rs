//! 分发：本轮由哪个处理器运行，只看 active_handler

use crate::core::state::{ConversationState, HandlerKind};

/// 返回本轮要调用的处理器；未设置时反序列化默认即为 Verifier
pub fn dispatch(state: &ConversationState) -> HandlerKind {
    state.active_handler()
}
