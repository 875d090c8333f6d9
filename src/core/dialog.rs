//! Conversation history and reply assembly.
//!
//! The dialog engine owns the rolling history for one session. The system
//! prompt is held apart from the turn list and always serialized first, so
//! eviction can never remove it. While a reply streams, deltas accumulate in
//! a pending buffer; `finalize_reply` commits the full text as the assistant
//! turn, and `rewind_on_interrupt` commits whatever the user actually heard
//! before barging in.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One exchange entry in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub ts: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            ts: Utc::now(),
        }
    }
}

/// Message shape expected by the chat completion endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Dialog tuning.
#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub system_prompt: String,
    /// Maximum retained (user, assistant) pairs.
    pub max_history_turns: usize,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful voice assistant. Keep your replies short \
                            and conversational; they will be spoken aloud."
                .to_string(),
            max_history_turns: 8,
        }
    }
}

/// Per-session conversation state.
pub struct DialogEngine {
    system_prompt: String,
    max_history_turns: usize,
    turns: VecDeque<Turn>,
    pending_reply: String,
    awaiting_reply: bool,
}

impl DialogEngine {
    pub fn new(config: DialogConfig) -> Self {
        Self {
            system_prompt: config.system_prompt,
            max_history_turns: config.max_history_turns,
            turns: VecDeque::new(),
            pending_reply: String::new(),
            awaiting_reply: false,
        }
    }

    /// Append a user turn and open the reply window.
    pub fn append_user(&mut self, text: &str) {
        self.turns.push_back(Turn::new(Role::User, text));
        self.pending_reply.clear();
        self.awaiting_reply = true;
        self.evict();
    }

    /// Accumulate one streamed delta of the in-flight reply.
    pub fn push_delta(&mut self, delta: &str) {
        self.pending_reply.push_str(delta);
    }

    /// The reply text streamed so far.
    pub fn partial_reply(&self) -> &str {
        &self.pending_reply
    }

    /// Commit the completed reply as the assistant turn and return it.
    pub fn finalize_reply(&mut self) -> String {
        let full = std::mem::take(&mut self.pending_reply);
        self.turns.push_back(Turn::new(Role::Assistant, full.clone()));
        self.awaiting_reply = false;
        self.evict();
        full
    }

    /// Close an interrupted reply.
    ///
    /// The partial text is committed as the assistant turn so the model later
    /// sees exactly what the user heard. If nothing streamed yet, the
    /// dangling user turn is dropped instead, keeping the history a strict
    /// user/assistant alternation. No-op when no reply is in flight.
    pub fn rewind_on_interrupt(&mut self) -> Option<String> {
        if !self.awaiting_reply {
            return None;
        }
        self.awaiting_reply = false;
        let partial = std::mem::take(&mut self.pending_reply);
        if partial.is_empty() {
            if self.turns.back().is_some_and(|t| t.role == Role::User) {
                self.turns.pop_back();
            }
            return None;
        }
        self.turns.push_back(Turn::new(Role::Assistant, partial.clone()));
        self.evict();
        Some(partial)
    }

    /// Whether a reply is currently streaming.
    pub fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    /// History serialized for the chat endpoint, system prompt first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt.clone(),
        });
        for turn in &self.turns {
            messages.push(ChatMessage {
                role: turn.role.as_str().to_string(),
                content: turn.text.clone(),
            });
        }
        messages
    }

    /// Replace the history with persisted turns, trimming oldest pairs past
    /// the cap.
    pub fn restore(&mut self, turns: Vec<Turn>) {
        self.turns = turns.into();
        self.pending_reply.clear();
        self.awaiting_reply = false;
        self.evict();
    }

    /// Snapshot of the retained turns, oldest first.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Drop the oldest (user, assistant) pair while over the cap. The system
    /// prompt lives outside the turn list and is never touched.
    fn evict(&mut self) {
        while self.turns.len() > self.max_history_turns * 2 {
            self.turns.pop_front();
            self.turns.pop_front();
        }
    }
}
