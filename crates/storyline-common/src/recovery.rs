//! Recovery strategies and the decision produced for one failure event.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Remediation chosen for a failed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryStrategy {
    RetrySameApproach,
    RollbackAndRetry,
    SkipPhase,
    EscalateToHuman,
    StuckRecovery,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RetrySameApproach => "retry-same-approach",
            Self::RollbackAndRetry => "rollback-and-retry",
            Self::SkipPhase => "skip-phase",
            Self::EscalateToHuman => "escalate-to-human",
            Self::StuckRecovery => "stuck-recovery",
        };
        write!(f, "{}", s)
    }
}

/// Decision for one failure event. Built once, never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryDecision {
    pub strategy: RecoveryStrategy,
    pub should_retry: bool,
    pub new_approach: bool,
    pub escalated: bool,
    #[serde(default)]
    pub skipped: bool,
}

impl RecoveryDecision {
    pub fn retry(strategy: RecoveryStrategy, new_approach: bool) -> Self {
        Self {
            strategy,
            should_retry: true,
            new_approach,
            escalated: false,
            skipped: false,
        }
    }

    pub fn skip() -> Self {
        Self {
            strategy: RecoveryStrategy::SkipPhase,
            should_retry: false,
            new_approach: false,
            escalated: false,
            skipped: true,
        }
    }

    pub fn escalate(strategy: RecoveryStrategy) -> Self {
        Self {
            strategy,
            should_retry: false,
            new_approach: false,
            escalated: true,
            skipped: false,
        }
    }

    /// Short outcome label used in the recovery log.
    pub fn outcome(&self) -> &'static str {
        if self.escalated {
            "escalated"
        } else if self.skipped {
            "skipped"
        } else if self.should_retry {
            "retry"
        } else {
            "stopped"
        }
    }
}
