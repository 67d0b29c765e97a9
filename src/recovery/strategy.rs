//! Strategy selection for a failed phase.
//!
//! Priority order, first match wins:
//! 1. stuck (circular failure pattern) → `stuck-recovery`
//! 2. attempts exhausted → `escalate-to-human`
//! 3. phase configured as skippable → `skip-phase`
//! 4. error text matches a rule in [`RULES`] → that rule's strategy
//! 5. otherwise: first failure retries as-is, later failures roll back

use regex::Regex;
use std::sync::LazyLock;
use storyline_common::RecoveryStrategy;

/// One entry of the error classification table.
pub struct ClassificationRule {
    pub name: &'static str,
    pub pattern: Regex,
    pub strategy: RecoveryStrategy,
}

fn rule(name: &'static str, pattern: &str, strategy: RecoveryStrategy) -> ClassificationRule {
    ClassificationRule {
        name,
        pattern: Regex::new(pattern).unwrap(),
        strategy,
    }
}

/// Ordered error classification rules.
pub static RULES: LazyLock<Vec<ClassificationRule>> = LazyLock::new(|| {
    vec![
        rule(
            "dependency",
            r"(?i)(cannot find module|module not found|no module named|importerror|unresolved import|failed to resolve|could not resolve|cannot find (crate|package)|package \S+ not found)",
            RecoveryStrategy::RollbackAndRetry,
        ),
        rule(
            "test-assertion",
            r"(?i)(assertionerror|assertion failed|assertion `.*` failed|\bexpected:? .+ (but )?(got|received|found)\b|\btests? failed\b)",
            RecoveryStrategy::RetrySameApproach,
        ),
        rule(
            "syntax",
            r"(?i)(syntaxerror|syntax error|unexpected token|parse error|expected one of)",
            RecoveryStrategy::RollbackAndRetry,
        ),
    ]
});

/// First rule whose pattern matches the error text.
pub fn classify_error(error: &str) -> Option<&'static ClassificationRule> {
    RULES.iter().find(|rule| rule.pattern.is_match(error))
}

/// Tunables that shape strategy selection.
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    pub skippable_phases: Vec<String>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            skippable_phases: Vec::new(),
        }
    }
}

/// A strategy and the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub strategy: RecoveryStrategy,
    pub reason: String,
}

impl Selection {
    fn new(strategy: RecoveryStrategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            reason: reason.into(),
        }
    }
}

pub fn select_strategy(
    policy: &RecoveryPolicy,
    stuck_reason: Option<&str>,
    failed_phase: &str,
    error: &str,
    attempts: u32,
) -> Selection {
    if let Some(reason) = stuck_reason {
        return Selection::new(RecoveryStrategy::StuckRecovery, format!("stuck: {}", reason));
    }
    if attempts >= policy.max_attempts {
        return Selection::new(
            RecoveryStrategy::EscalateToHuman,
            format!("{} of {} attempts used", attempts, policy.max_attempts),
        );
    }
    if policy.skippable_phases.iter().any(|p| p == failed_phase) {
        return Selection::new(
            RecoveryStrategy::SkipPhase,
            format!("phase '{}' is skippable", failed_phase),
        );
    }
    if let Some(rule) = classify_error(error) {
        return Selection::new(rule.strategy, format!("{} error", rule.name));
    }
    if attempts == 0 {
        Selection::new(RecoveryStrategy::RetrySameApproach, "first failure")
    } else {
        Selection::new(RecoveryStrategy::RollbackAndRetry, "repeated failure")
    }
}
