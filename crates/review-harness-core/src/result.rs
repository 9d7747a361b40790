// crates/review-harness-core/src/result.rs
// ============================================================================
// Module: Test Results
// Description: Category tags and immutable per-check result records.
// Purpose: Provide the record type produced by the runner and read by reports.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`TestResult`] is created once per runner invocation and never mutated.
//! Fields are private; callers read them through accessors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Category
// ============================================================================

/// Fixed set of check families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Injection blocking, privilege escalation, encryption.
    Security,
    /// Query latency thresholds and plan shape.
    Performance,
    /// CRUD, constraints, and trigger-maintained summaries.
    Business,
    /// Bulk and parallel load plus the adverse battery.
    Stress,
    /// Raw interpolated injection probes.
    Injection,
    /// Backup history and verification.
    Backup,
    /// Partition creation and maintenance.
    Partition,
    /// Concurrent writers, deadlocks, isolation.
    Concurrent,
}

impl Category {
    /// All categories in report order.
    pub const ALL: [Self; 8] = [
        Self::Security,
        Self::Performance,
        Self::Business,
        Self::Stress,
        Self::Injection,
        Self::Backup,
        Self::Partition,
        Self::Concurrent,
    ];

    /// Returns a stable label for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Business => "business",
            Self::Stress => "stress",
            Self::Injection => "injection",
            Self::Backup => "backup",
            Self::Partition => "partition",
            Self::Concurrent => "concurrent",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| format!("unknown category: {value}"))
    }
}

// ============================================================================
// SECTION: Test Result
// ============================================================================

/// Immutable record of one check invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    /// Check family.
    category: Category,
    /// Display name.
    name: String,
    /// Whether the check passed.
    passed: bool,
    /// One-line message.
    message: String,
    /// Wall-clock duration.
    #[serde(serialize_with = "serialize_secs")]
    duration: Duration,
    /// Optional report payload.
    details: Option<Value>,
}

impl TestResult {
    /// Creates a result record.
    #[must_use]
    pub fn new(
        category: Category,
        name: impl Into<String>,
        passed: bool,
        message: impl Into<String>,
        duration: Duration,
        details: Option<Value>,
    ) -> Self {
        Self {
            category,
            name: name.into(),
            passed,
            message: message.into(),
            duration,
            details,
        }
    }

    /// Returns the category.
    #[must_use]
    pub const fn category(&self) -> Category {
        self.category
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true when the check passed.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.passed
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the details payload.
    #[must_use]
    pub const fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }
}

/// Serializes a duration as fractional seconds.
fn serialize_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
