//! Bounded per-channel conversation history and relay windowing.

use crate::event::ChannelId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const DEFAULT_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

/// One prior conversation turn as replayed to the reasoning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool_call(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::ToolCall,
            content: content.into(),
        }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::ToolResult,
            content: content.into(),
        }
    }
}

/// Returns the at-most-`window` most recent turns.
///
/// A tool invocation and its result are never split across the boundary:
/// results whose invocation fell outside the window are dropped rather than
/// widening the window, keeping the cost bound strict.
pub fn windowed(turns: &[ConversationTurn], window: usize) -> Vec<ConversationTurn> {
    let mut start = turns.len().saturating_sub(window);
    while start < turns.len() && turns[start].role == TurnRole::ToolResult {
        start += 1;
    }
    turns[start..].to_vec()
}

/// Process-wide conversation store, bounded per channel.
///
/// Retains twice the relay window per channel so windowing has slack; the
/// backend owns durable history.
pub struct ConversationStore {
    window: usize,
    retain: usize,
    channels: Mutex<HashMap<ChannelId, VecDeque<ConversationTurn>>>,
}

impl ConversationStore {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            retain: window * 2,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn push(&self, channel: &ChannelId, turn: ConversationTurn) {
        let mut channels = self.lock();
        let turns = channels.entry(channel.clone()).or_default();
        turns.push_back(turn);
        while turns.len() > self.retain {
            turns.pop_front();
        }
    }

    /// Snapshot of the relay window for a channel.
    pub fn window(&self, channel: &ChannelId) -> Vec<ConversationTurn> {
        let channels = self.lock();
        match channels.get(channel) {
            Some(turns) => {
                let turns: Vec<ConversationTurn> = turns.iter().cloned().collect();
                windowed(&turns, self.window)
            }
            None => Vec::new(),
        }
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<ChannelId, VecDeque<ConversationTurn>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(entries: &[(TurnRole, &str)]) -> Vec<ConversationTurn> {
        entries
            .iter()
            .map(|(role, content)| ConversationTurn {
                role: *role,
                content: (*content).to_string(),
            })
            .collect()
    }

    #[test]
    fn window_keeps_the_most_recent_turns() {
        let history: Vec<ConversationTurn> = (0..10)
            .map(|n| ConversationTurn::user(format!("turn {n}")))
            .collect();
        let window = windowed(&history, 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "turn 6");
        assert_eq!(window[3].content, "turn 9");
    }

    #[test]
    fn window_smaller_than_history_is_returned_whole() {
        let history = turns(&[(TurnRole::User, "a"), (TurnRole::Assistant, "b")]);
        assert_eq!(windowed(&history, 30), history);
    }

    #[test]
    fn orphaned_tool_results_are_dropped_at_the_boundary() {
        let history = turns(&[
            (TurnRole::User, "look this up"),
            (TurnRole::ToolCall, "search(query)"),
            (TurnRole::ToolResult, "result body"),
            (TurnRole::Assistant, "here you go"),
            (TurnRole::User, "thanks"),
        ]);

        // A window of 3 would start at the tool result, splitting the pair;
        // the orphan is shed instead.
        let window = windowed(&history, 3);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].role, TurnRole::Assistant);

        // A window of 4 keeps the pair intact.
        let window = windowed(&history, 4);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].role, TurnRole::ToolCall);
    }

    #[test]
    fn consecutive_orphaned_results_are_all_shed() {
        let history = turns(&[
            (TurnRole::ToolCall, "call"),
            (TurnRole::ToolResult, "first"),
            (TurnRole::ToolResult, "second"),
            (TurnRole::Assistant, "done"),
        ]);
        let window = windowed(&history, 3);
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].role, TurnRole::Assistant);
    }

    #[test]
    fn store_is_bounded_per_channel() {
        let store = ConversationStore::new(5);
        let channel = ChannelId::new("general");
        for n in 0..100 {
            store.push(&channel, ConversationTurn::user(format!("{n}")));
        }
        let window = store.window(&channel);
        assert_eq!(window.len(), 5);
        assert_eq!(window[4].content, "99");
    }

    #[test]
    fn channels_are_independent() {
        let store = ConversationStore::new(5);
        store.push(&ChannelId::new("a"), ConversationTurn::user("hello"));
        assert!(store.window(&ChannelId::new("b")).is_empty());
        assert_eq!(store.window(&ChannelId::new("a")).len(), 1);
    }
}
