//! 会话状态：有序消息日志、历史窗口、同角色合并与占位符替换
//!
//! Conversation state owned by one chat handle.
//!
//! Stored history keeps every entry distinct. The outgoing snapshot built by
//! [`ConversationState::outgoing`] applies, in order:
//!
//! 1. **Windowing**: the last N stored entries (never fewer than the inputs
//!    added since the previous exchange, never starting on a tool-result entry),
//!    followed by every entry produced by the tool loop in flight.
//! 2. **Placeholder substitution** on every text part.
//! 3. **Role grouping**: consecutive entries with the same role are merged
//!    into one message, parts concatenated in order.

pub mod template;

use crate::types::{ContentPart, Message, MessageRole, NormalizedResponse};

pub use template::Placeholders;

/// How much stored history is transmitted and retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPolicy {
    Unlimited,
    /// Last N entries.
    Window(usize),
    /// Cleared after every exchange.
    None,
}

impl HistoryPolicy {
    /// Negative = unlimited, 0 = none, N = last N.
    pub fn from_max_history(n: i32) -> Self {
        match n {
            n if n < 0 => HistoryPolicy::Unlimited,
            0 => HistoryPolicy::None,
            n => HistoryPolicy::Window(n as usize),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    policy: HistoryPolicy,
    system: Option<String>,
    placeholders: Placeholders,
    /// Index of the first entry added since the last completed exchange.
    pending_start: usize,
}

impl ConversationState {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            messages: Vec::new(),
            policy,
            system: None,
            placeholders: Placeholders::new(),
            pending_start: 0,
        }
    }

    pub fn policy(&self) -> HistoryPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: HistoryPolicy) {
        self.policy = policy;
    }

    pub fn set_system(&mut self, text: impl Into<String>) {
        self.system = Some(text.into());
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    pub fn placeholders_mut(&mut self) -> &mut Placeholders {
        &mut self.placeholders
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_text(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn add_part(&mut self, part: ContentPart) {
        self.push(Message::new(MessageRole::User, vec![part]));
    }

    /// Store a model reply. Plain replies with empty text are dropped;
    /// tool-call turns are always kept so their results stay paired.
    pub fn push_reply(&mut self, response: &NormalizedResponse) {
        if response.has_tool_calls() {
            let mut parts = Vec::with_capacity(response.tool_calls.len() + 1);
            if !response.text.is_empty() {
                parts.push(ContentPart::text(response.text.clone()));
            }
            parts.extend(response.tool_calls.iter().cloned().map(ContentPart::ToolCall));
            self.push(Message::new(MessageRole::Assistant, parts));
        } else if !response.text.is_empty() {
            self.push(Message::assistant(response.text.clone()));
        }
    }

    /// Close the current exchange and apply the retention policy.
    pub fn finish_exchange(&mut self) {
        match self.policy {
            HistoryPolicy::None => self.messages.clear(),
            HistoryPolicy::Window(n) if self.messages.len() > n => {
                let cut = self.messages.len() - n;
                self.messages.drain(..cut);
            }
            _ => {}
        }
        self.pending_start = self.messages.len();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.pending_start = 0;
    }

    /// Drop entries added after `len` (a failed candidate's tool-loop turns).
    pub fn rollback(&mut self, len: usize) {
        self.messages.truncate(len);
        self.pending_start = self.pending_start.min(self.messages.len());
    }

    /// Index where a tool loop started now would anchor.
    pub fn anchor(&self) -> usize {
        self.messages.len()
    }

    /// Start index of the transmitted window over `messages[..anchor]`.
    fn window_start(&self, anchor: usize) -> usize {
        let pending = self.pending_start.min(anchor);
        let mut start = match self.policy {
            HistoryPolicy::Unlimited => 0,
            HistoryPolicy::None => pending,
            HistoryPolicy::Window(n) => anchor.saturating_sub(n).min(pending),
        };
        while start < anchor && self.messages[start].role == MessageRole::Tool {
            start += 1;
        }
        start
    }

    /// Outgoing snapshot for a request whose tool loop anchored at `anchor`.
    pub fn outgoing(&self, anchor: usize) -> Vec<Message> {
        let anchor = anchor.min(self.messages.len());
        let start = self.window_start(anchor);
        let substituted = self.messages[start..].iter().map(|m| self.substitute(m));
        group_by_role(substituted)
    }

    /// System prompt with placeholders applied.
    pub fn outgoing_system(&self) -> Option<String> {
        self.system
            .as_deref()
            .map(|s| self.placeholders.apply(s))
            .filter(|s| !s.is_empty())
    }

    fn substitute(&self, message: &Message) -> Message {
        if self.placeholders.is_empty() {
            return message.clone();
        }
        let parts = message
            .parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => ContentPart::text(self.placeholders.apply(text)),
                other => other.clone(),
            })
            .collect();
        Message::new(message.role, parts)
    }
}

/// Merge consecutive same-role messages, keeping part order.
pub fn group_by_role(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::new();
    for m in messages {
        match out.last_mut() {
            Some(prev) if prev.role == m.role => prev.parts.extend(m.parts),
            _ => out.push(m),
        }
    }
    out
}
