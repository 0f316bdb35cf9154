// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message sanitization applied before a [`CompletionRequest`](crate::CompletionRequest)
//! is dispatched: strip image content when the model does not support it, and
//! strip cache-control markers when the model does not honor provider-side
//! prompt caching.

use crate::{
    provider::InputModality,
    types::{ContentPart, Message, MessageContent, ToolContentPart, ToolResultContent},
};

const IMAGE_OMITTED: &str = "[image omitted: model does not support image input]";

/// Replace all image content in `messages` with a text placeholder when
/// `modalities` does not include [`InputModality::Image`].
pub fn strip_images_if_unsupported(messages: Vec<Message>, modalities: &[InputModality]) -> Vec<Message> {
    if modalities.contains(&InputModality::Image) {
        return messages;
    }
    messages.into_iter().map(strip_message_images).collect()
}

fn strip_message_images(mut m: Message) -> Message {
    m.content = match m.content {
        MessageContent::ContentParts(parts) => {
            let stripped: Vec<ContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Image { .. } => ContentPart::text(IMAGE_OMITTED),
                    other => other,
                })
                .collect();
            collapse_content_parts(stripped)
        }
        MessageContent::ToolResult { tool_call_id, content } => {
            MessageContent::ToolResult { tool_call_id, content: strip_tool_result_images(content) }
        }
        other => other,
    };
    m
}

fn strip_tool_result_images(content: ToolResultContent) -> ToolResultContent {
    match content {
        ToolResultContent::Parts(parts) => {
            let stripped: Vec<ToolContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ToolContentPart::Image { .. } => ToolContentPart::Text { text: IMAGE_OMITTED.to_string() },
                    other => other,
                })
                .collect();
            if stripped.len() == 1 {
                if let ToolContentPart::Text { text } = &stripped[0] {
                    return ToolResultContent::Text(text.clone());
                }
            }
            ToolResultContent::Parts(stripped)
        }
        other => other,
    }
}

/// Clear the cache-control marker on every text part when the model does not
/// honor provider-side prompt caching.
pub fn strip_cache_control_if_unsupported(messages: Vec<Message>, supports_cache_control: bool) -> Vec<Message> {
    if supports_cache_control {
        return messages;
    }
    messages.into_iter().map(strip_message_cache_control).collect()
}

fn strip_message_cache_control(mut m: Message) -> Message {
    m.content = match m.content {
        MessageContent::ContentParts(parts) => {
            let cleared: Vec<ContentPart> = parts
                .into_iter()
                .map(|p| match p {
                    ContentPart::Text { text, .. } => ContentPart::Text { text, cache_control: false },
                    other => other,
                })
                .collect();
            collapse_content_parts(cleared)
        }
        other => other,
    };
    m
}

/// Collapse a single plain-text part back to `MessageContent::Text` for
/// cleaner serialization, unless it still carries a cache-control marker.
fn collapse_content_parts(parts: Vec<ContentPart>) -> MessageContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text, cache_control: false } = &parts[0] {
            return MessageContent::Text(text.clone());
        }
    }
    MessageContent::ContentParts(parts)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
