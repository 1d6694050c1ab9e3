//! Loop guard for agentic tool-calling loops.
//!
//! Detects when the LLM is stuck calling the same tool repeatedly with the
//! same arguments and escalates: first a redirect hint injected into the
//! conversation, then termination of the run.

use std::collections::VecDeque;

use serde_json::Value;

use crate::tools::canonical_json;

/// How many identical (tool, arguments) sightings trigger intervention.
const REPEAT_THRESHOLD: usize = 3;

/// How many recent dispatches are considered.
const WINDOW: usize = 5;

/// Outcome of recording one tool dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopVerdict {
    /// Nothing suspicious
    Clear,
    /// First detection: inject this system-role hint and continue
    Redirect(String),
    /// Second detection: terminate the run
    Abort,
}

/// Tracks recent tool dispatches and detects stuck loops.
pub struct LoopGuard {
    /// Recent (tool_name, canonical_arguments) entries, oldest first.
    recent: VecDeque<(String, String)>,
    /// Detections so far in this run.
    strikes: u32,
}

impl LoopGuard {
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(WINDOW + 1),
            strikes: 0,
        }
    }

    /// Record a dispatched tool call.
    ///
    /// Returns `Redirect` when the same (tool, arguments) pair has shown up
    /// three times within the last five dispatches with no progress in
    /// between, and `Abort` once the window holds five of them — the fifth
    /// repetition. Only progress clears the window; a redirect does not.
    pub fn record(&mut self, tool_name: &str, arguments: &Value) -> LoopVerdict {
        let key = (tool_name.to_string(), canonical_json(arguments));
        self.recent.push_back(key.clone());
        while self.recent.len() > WINDOW {
            self.recent.pop_front();
        }

        let repeats = self.recent.iter().filter(|entry| **entry == key).count();

        if repeats >= WINDOW {
            return LoopVerdict::Abort;
        }
        if repeats >= REPEAT_THRESHOLD && self.strikes == 0 {
            self.strikes = 1;
            return LoopVerdict::Redirect(format!(
                "The tool '{}' has been called {} times with the same arguments \
                 without making progress. Do NOT repeat this call. Use a different \
                 tool or a different approach, or answer with what you already know.",
                tool_name, REPEAT_THRESHOLD
            ));
        }
        LoopVerdict::Clear
    }

    /// Note forward progress: a non-empty assistant message or a successful
    /// tool result. Clears the repetition window.
    pub fn note_progress(&mut self) {
        self.recent.clear();
    }

    /// Reset between runs.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.strikes = 0;
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_trigger_on_distinct_arguments() {
        let mut guard = LoopGuard::new();
        assert_eq!(guard.record("web_search", &json!({"q": "a"})), LoopVerdict::Clear);
        assert_eq!(guard.record("web_search", &json!({"q": "b"})), LoopVerdict::Clear);
        assert_eq!(guard.record("web_search", &json!({"q": "c"})), LoopVerdict::Clear);
    }

    #[test]
    fn third_repeat_redirects_fifth_aborts() {
        let mut guard = LoopGuard::new();
        let args = json!({"q": "same"});
        assert_eq!(guard.record("web_search", &args), LoopVerdict::Clear);
        assert_eq!(guard.record("web_search", &args), LoopVerdict::Clear);
        assert!(matches!(
            guard.record("web_search", &args),
            LoopVerdict::Redirect(_)
        ));
        assert_eq!(guard.record("web_search", &args), LoopVerdict::Clear);
        assert_eq!(guard.record("web_search", &args), LoopVerdict::Abort);
    }

    #[test]
    fn redirect_fires_only_once() {
        let mut guard = LoopGuard::new();
        let args = json!({"q": "same"});
        guard.record("web_search", &args);
        guard.record("web_search", &args);
        assert!(matches!(
            guard.record("web_search", &args),
            LoopVerdict::Redirect(_)
        ));
        // The fourth repetition neither re-redirects nor aborts yet
        assert_eq!(guard.record("web_search", &args), LoopVerdict::Clear);
    }

    #[test]
    fn progress_clears_the_window() {
        let mut guard = LoopGuard::new();
        let args = json!({"q": "same"});
        guard.record("web_search", &args);
        guard.record("web_search", &args);
        guard.note_progress();
        assert_eq!(guard.record("web_search", &args), LoopVerdict::Clear);
    }

    #[test]
    fn key_ignores_field_order() {
        let mut guard = LoopGuard::new();
        guard.record("t", &json!({"a": 1, "b": 2}));
        guard.record("t", &json!({"b": 2, "a": 1}));
        assert!(matches!(
            guard.record("t", &json!({"a": 1, "b": 2})),
            LoopVerdict::Redirect(_)
        ));
    }

    #[test]
    fn stale_repeats_fall_out_of_window() {
        let mut guard = LoopGuard::new();
        let args = json!({"q": "same"});
        guard.record("t", &args);
        guard.record("t", &args);
        for i in 0..4 {
            guard.record("other", &json!({ "i": i }));
        }
        // The two old sightings are outside the five-entry window now
        assert_eq!(guard.record("t", &args), LoopVerdict::Clear);
    }
}
