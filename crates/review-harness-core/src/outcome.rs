// crates/review-harness-core/src/outcome.rs
// ============================================================================
// Module: Check Outcomes
// Description: Typed pass/fail outcomes returned by every check.
// Purpose: Make success determination a total match instead of payload probing.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every check returns a [`CheckOutput`]: an [`Outcome`] that decides pass or
//! fail, and a free-form JSON `details` payload for the report. The runner
//! never inspects `details` to decide success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Step Outcomes
// ============================================================================

/// Status of a single sub-step within a composite check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step met its criterion.
    Passed,
    /// The step missed its criterion.
    Failed,
    /// The step did not run (missing prerequisite).
    Skipped,
}

impl StepStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Result of one sub-step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step display name.
    pub name: String,
    /// Step status.
    pub status: StepStatus,
    /// Human-readable explanation.
    pub message: String,
}

impl StepOutcome {
    /// Creates a passed step.
    #[must_use]
    pub fn passed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Passed,
            message: message.into(),
        }
    }

    /// Creates a failed step.
    #[must_use]
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failed,
            message: message.into(),
        }
    }

    /// Creates a skipped step.
    #[must_use]
    pub fn skipped(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            message: message.into(),
        }
    }

    /// Creates a passed or failed step from a condition.
    #[must_use]
    pub fn check(name: impl Into<String>, ok: bool, message: impl Into<String>) -> Self {
        if ok { Self::passed(name, message) } else { Self::failed(name, message) }
    }
}

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Overall outcome of a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The check met its criterion.
    Pass,
    /// The check missed its criterion.
    Fail {
        /// Why the check failed.
        reason: String,
    },
    /// Composite check; fails when any step failed.
    Steps {
        /// Sub-step outcomes in execution order.
        steps: Vec<StepOutcome>,
    },
}

impl Outcome {
    /// Creates a failing outcome.
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail {
            reason: reason.into(),
        }
    }

    /// Returns true when the outcome counts as a pass.
    #[must_use]
    pub fn passed(&self) -> bool {
        match self {
            Self::Pass => true,
            Self::Fail {
                ..
            } => false,
            Self::Steps {
                steps,
            } => steps.iter().all(|step| step.status != StepStatus::Failed),
        }
    }

    /// Returns a one-line summary message.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Pass => "passed".to_string(),
            Self::Fail {
                reason,
            } => reason.clone(),
            Self::Steps {
                steps,
            } => {
                let passed = steps.iter().filter(|step| step.status == StepStatus::Passed).count();
                let failed: Vec<&str> = steps
                    .iter()
                    .filter(|step| step.status == StepStatus::Failed)
                    .map(|step| step.name.as_str())
                    .collect();
                if failed.is_empty() {
                    format!("{passed}/{} steps passed", steps.len())
                } else {
                    format!(
                        "{passed}/{} steps passed; failed: {}",
                        steps.len(),
                        failed.join(", ")
                    )
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Check Output
// ============================================================================

/// Value returned by a check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutput {
    /// Pass/fail decision.
    pub outcome: Outcome,
    /// Free-form report payload.
    pub details: Value,
}

impl CheckOutput {
    /// Creates an output with empty details.
    #[must_use]
    pub const fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            details: Value::Null,
        }
    }

    /// Creates a passing output with details.
    #[must_use]
    pub const fn pass(details: Value) -> Self {
        Self {
            outcome: Outcome::Pass,
            details,
        }
    }

    /// Creates a passing or failing output from a condition.
    #[must_use]
    pub fn from_condition(ok: bool, reason: impl Into<String>, details: Value) -> Self {
        let outcome = if ok { Outcome::Pass } else { Outcome::fail(reason) };
        Self {
            outcome,
            details,
        }
    }

    /// Creates a composite output; step outcomes are also embedded in details.
    #[must_use]
    pub fn steps(steps: Vec<StepOutcome>, details: Value) -> Self {
        let details = match details {
            Value::Object(mut map) => {
                map.insert("steps".to_string(), json!(steps));
                Value::Object(map)
            }
            Value::Null => json!({ "steps": steps }),
            other => json!({ "steps": steps, "data": other }),
        };
        Self {
            outcome: Outcome::Steps {
                steps,
            },
            details,
        }
    }

    /// Attaches details to the output.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
