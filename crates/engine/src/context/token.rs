//! Prompt-level token estimates.
//!
//! Builds on `procura_core::token::estimate_tokens` (1 token ≈ 4 bytes).

use procura_core::Message;
use procura_core::token::estimate_tokens;

/// Role name and delimiters on the wire.
const MESSAGE_OVERHEAD: usize = 4;

pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
