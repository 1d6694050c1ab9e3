//! Rolling conversation memory
//!
//! A token-budgeted message store that preserves the structural invariants
//! tool-calling protocols require: a tool-role message always refers to a
//! tool call in an earlier assistant message, and eviction never strands a
//! tool result whose assistant message is gone.

use tracing::warn;

use crate::agent::types::{Message, Role};
use crate::error::{Error, Result};

/// Fixed per-message token overhead (role, framing)
const MESSAGE_OVERHEAD: usize = 8;

/// Estimate tokens for one message: ceil(chars / 4) plus overhead.
///
/// Deliberately rough; it only has to be monotone and deterministic.
fn message_tokens(msg: &Message) -> usize {
    msg.content.chars().count().div_ceil(4) + MESSAGE_OVERHEAD
}

/// Token-budgeted, order-preserving message store
#[derive(Debug, Clone)]
pub struct MessageStore {
    /// Pinned system message, never evicted
    system: Option<Message>,
    /// Conversation messages in strict insertion order
    messages: Vec<Message>,
    /// Token budget enforced after every mutation
    max_tokens: usize,
}

impl MessageStore {
    /// Create a store with the given token budget.
    pub fn new(max_tokens: usize) -> Self {
        MessageStore {
            system: None,
            messages: Vec::new(),
            max_tokens,
        }
    }

    /// Replace the pinned system message.
    pub fn set_system(&mut self, message: Message) {
        debug_assert_eq!(message.role, Role::System);
        self.system = Some(message);
    }

    /// Append a message, evicting oldest groups if the budget is exceeded.
    ///
    /// Tool-role messages must answer a tool call present in an earlier
    /// assistant message, otherwise the append is rejected.
    pub fn append(&mut self, message: Message) -> Result<()> {
        if message.role == Role::Tool {
            let id = message.tool_call_id.as_deref().ok_or_else(|| {
                Error::Validation("tool message missing tool_call_id".into())
            })?;
            if !self.has_tool_call(id) {
                return Err(Error::Validation(format!(
                    "tool message references unknown tool_call_id '{}'",
                    id
                )));
            }
        }

        self.messages.push(message);
        self.evict_to_budget();
        Ok(())
    }

    /// Independent ordered copy of the conversation, system message first.
    pub fn snapshot(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref system) = self.system {
            out.push(system.clone());
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Total estimated tokens across system and conversation messages.
    pub fn token_count(&self) -> usize {
        let system = self.system.as_ref().map(message_tokens).unwrap_or(0);
        system + self.messages.iter().map(message_tokens).sum::<usize>()
    }

    /// Drop all non-system messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Number of non-system messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if no non-system messages are held.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Most recent tool-role messages, newest first, up to `n`.
    pub fn recent_tool_results(&self, n: usize) -> Vec<&Message> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Tool)
            .take(n)
            .collect()
    }

    fn has_tool_call(&self, id: &str) -> bool {
        self.messages.iter().any(|m| {
            m.tool_calls
                .as_ref()
                .is_some_and(|calls| calls.iter().any(|c| c.id == id))
        })
    }

    /// Remove oldest evictable groups until the budget is met.
    ///
    /// A group is either a single user/assistant-without-calls message or a
    /// contiguous (assistant-with-calls, its tool results) block; the block
    /// is removed atomically so no tool result dangles. If only the pinned
    /// system message and the newest message remain, the over-budget state
    /// is accepted.
    fn evict_to_budget(&mut self) {
        while self.token_count() > self.max_tokens {
            let group = self.front_group_len();
            if group == 0 || group >= self.messages.len() {
                // Evicting would take the newest message with it; accept.
                if self.token_count() > self.max_tokens {
                    warn!(
                        tokens = self.token_count(),
                        budget = self.max_tokens,
                        "memory over budget with no evictable group remaining"
                    );
                }
                break;
            }
            self.messages.drain(..group);
        }
    }

    /// Length of the evictable group at the front of the store.
    fn front_group_len(&self) -> usize {
        let Some(first) = self.messages.first() else {
            return 0;
        };

        if first.role == Role::Assistant && first.has_tool_calls() {
            let ids: Vec<&str> = first
                .tool_calls
                .as_ref()
                .unwrap()
                .iter()
                .map(|c| c.id.as_str())
                .collect();
            let mut len = 1;
            for msg in &self.messages[1..] {
                let answers_front = msg.role == Role::Tool
                    && msg
                        .tool_call_id
                        .as_deref()
                        .is_some_and(|id| ids.contains(&id));
                if answers_front {
                    len += 1;
                } else {
                    break;
                }
            }
            len
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::{AssistantToolCall, FunctionCall};

    fn call(id: &str) -> AssistantToolCall {
        AssistantToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: "bash".to_string(),
                arguments: "{}".to_string(),
            },
        }
    }

    fn tool_results_have_antecedents(store: &MessageStore) -> bool {
        let snapshot = store.snapshot();
        snapshot.iter().enumerate().all(|(i, m)| {
            if m.role != Role::Tool {
                return true;
            }
            let id = m.tool_call_id.as_deref().unwrap();
            snapshot[..i].iter().any(|earlier| {
                earlier
                    .tool_calls
                    .as_ref()
                    .is_some_and(|calls| calls.iter().any(|c| c.id == id))
            })
        })
    }

    #[test]
    fn append_preserves_order() {
        let mut store = MessageStore::new(10_000);
        store.append(Message::user("one")).unwrap();
        store.append(Message::assistant("two")).unwrap();
        let snap = store.snapshot();
        assert_eq!(snap[0].content, "one");
        assert_eq!(snap[1].content, "two");
    }

    #[test]
    fn rejects_dangling_tool_message() {
        let mut store = MessageStore::new(10_000);
        let err = store.append(Message::tool("nope", "result")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn accepts_tool_message_answering_earlier_call() {
        let mut store = MessageStore::new(10_000);
        store
            .append(Message::assistant_with_tools("", vec![call("c1")]))
            .unwrap();
        store.append(Message::tool("c1", "ok")).unwrap();
        assert!(tool_results_have_antecedents(&store));
    }

    #[test]
    fn evicts_oldest_single_messages_first() {
        // Budget that fits roughly three short messages
        let mut store = MessageStore::new(40);
        store.append(Message::user("aaaa")).unwrap();
        store.append(Message::assistant("bbbb")).unwrap();
        store.append(Message::user("cccc")).unwrap();
        store.append(Message::user("dddd")).unwrap();
        assert!(store.token_count() <= 40);
        let snap = store.snapshot();
        assert_eq!(snap.last().unwrap().content, "dddd");
        assert!(snap.iter().all(|m| m.content != "aaaa"));
    }

    #[test]
    fn evicts_tool_call_groups_atomically() {
        let mut store = MessageStore::new(10_000);
        store
            .append(Message::assistant_with_tools("", vec![call("c1"), call("c2")]))
            .unwrap();
        store.append(Message::tool("c1", "r1")).unwrap();
        store.append(Message::tool("c2", "r2")).unwrap();
        store.append(Message::user("next question")).unwrap();

        // Shrink the budget and force eviction via a fresh append
        store.max_tokens = 40;
        store.append(Message::assistant("answer")).unwrap();

        // The assistant-with-calls block and both results must be gone together
        let snap = store.snapshot();
        assert!(snap.iter().all(|m| m.role != Role::Tool));
        assert!(snap.iter().all(|m| !m.has_tool_calls()));
        assert!(tool_results_have_antecedents(&store));
    }

    #[test]
    fn over_budget_accepted_when_only_newest_remains() {
        let mut store = MessageStore::new(10);
        store.set_system(Message::system("sys"));
        let long = "x".repeat(400);
        store.append(Message::user(long)).unwrap();
        // One message besides system; over budget but nothing evictable
        assert_eq!(store.len(), 1);
        assert!(store.token_count() > 10);
    }

    #[test]
    fn system_message_never_evicted() {
        let mut store = MessageStore::new(30);
        store.set_system(Message::system("pinned"));
        for i in 0..10 {
            store.append(Message::user(format!("msg {}", i))).unwrap();
        }
        let snap = store.snapshot();
        assert_eq!(snap[0].role, Role::System);
        assert_eq!(snap[0].content, "pinned");
    }

    #[test]
    fn clear_keeps_system() {
        let mut store = MessageStore::new(1000);
        store.set_system(Message::system("pinned"));
        store.append(Message::user("hello")).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn token_count_is_monotone_in_content() {
        let short = message_tokens(&Message::user("hi"));
        let long = message_tokens(&Message::user("hi there, this is longer"));
        assert!(long > short);
        assert_eq!(message_tokens(&Message::user("")), MESSAGE_OVERHEAD);
    }
}
