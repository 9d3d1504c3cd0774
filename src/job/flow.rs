//! Flow controller: exit-status-keyed transitions between nodes.
//!
//! The transition table is a set of rules `(from, on) -> to` where `on` is an
//! exact exit code or the wildcard `*`. Rules are evaluated in specificity
//! order: an exact match always wins over a wildcard. When no rule matches,
//! the job terminates with the current status.
//!
//! Cycles are representable but never detected at runtime; a definition that
//! loops forever is a configuration mistake, not an engine concern.

use serde::{Deserialize, Serialize};

/// Matches any exit code in a transition rule.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: String,
    pub on: String,
    pub to: String,
}

/// Directed graph of transitions over the job's nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowDefinition {
    rules: Vec<TransitionRule>,
}

impl FlowDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(
        &mut self,
        from: impl Into<String>,
        on: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.rules.push(TransitionRule {
            from: from.into(),
            on: on.into(),
            to: to.into(),
        });
    }

    /// Next node after `from` finished with `exit_code`, or `None` when the
    /// job should terminate with that status.
    pub fn resolve(&self, from: &str, exit_code: &str) -> Option<&str> {
        let exact = self
            .rules
            .iter()
            .find(|rule| rule.from == from && rule.on == exit_code);
        let rule = exact.or_else(|| {
            self.rules
                .iter()
                .find(|rule| rule.from == from && rule.on == WILDCARD)
        })?;
        Some(rule.to.as_str())
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_flow() -> FlowDefinition {
        let mut flow = FlowDefinition::new();
        flow.add_rule("validation", "COMPLETED", "healthCheck");
        flow.add_rule("validation", "FAILED", "notification");
        flow.add_rule("healthCheck", "COMPLETED", "volumeDecider");
        flow.add_rule("volumeDecider", "LIGHT_PROCESSING", "lightProcessing");
        flow.add_rule("volumeDecider", "HEAVY_PROCESSING", "heavyProcessing");
        flow.add_rule("cleanup", "*", "notification");
        flow
    }

    #[test]
    fn test_exact_match_routing() {
        let flow = chain_flow();
        assert_eq!(flow.resolve("validation", "COMPLETED"), Some("healthCheck"));
        assert_eq!(flow.resolve("validation", "FAILED"), Some("notification"));
        assert_eq!(
            flow.resolve("volumeDecider", "HEAVY_PROCESSING"),
            Some("heavyProcessing")
        );
    }

    #[test]
    fn test_wildcard_matches_any_status() {
        let flow = chain_flow();
        assert_eq!(flow.resolve("cleanup", "COMPLETED"), Some("notification"));
        assert_eq!(flow.resolve("cleanup", "FAILED"), Some("notification"));
        assert_eq!(flow.resolve("cleanup", "CUSTOM"), Some("notification"));
    }

    #[test]
    fn test_exact_match_beats_wildcard() {
        let mut flow = FlowDefinition::new();
        flow.add_rule("stepA", "*", "fallback");
        flow.add_rule("stepA", "FAILED", "errorHandler");

        // Exact rule wins even though the wildcard was registered first.
        assert_eq!(flow.resolve("stepA", "FAILED"), Some("errorHandler"));
        assert_eq!(flow.resolve("stepA", "COMPLETED"), Some("fallback"));
    }

    #[test]
    fn test_no_match_terminates() {
        let flow = chain_flow();
        assert_eq!(flow.resolve("notification", "COMPLETED"), None);
        assert_eq!(flow.resolve("healthCheck", "FAILED"), None);
    }
}
