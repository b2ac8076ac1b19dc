//! Test-plan parser seam.
//!
//! Plan parsing lives outside this crate. The controller hands a plan's bytes
//! and variables to a [`TestPlanParser`] and builds dispatch parameters from
//! the summary it returns.

use std::collections::BTreeMap;

use thiserror::Error;

/// What the dispatcher needs to know about a parsed plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTestPlan {
    pub bucket_size_ms: u64,
    pub test_run_time_minutes: u32,
    pub input_files: Vec<String>,
    pub logger_files: Vec<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TestPlanParseError {
    pub message: String,
}

impl TestPlanParseError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait TestPlanParser: Send + Sync {
    /// # Errors
    ///
    /// Returns a parse error describing why the plan is invalid.
    fn parse(
        &self,
        plan: &[u8],
        variables: &BTreeMap<String, String>,
    ) -> Result<ParsedTestPlan, TestPlanParseError>;
}
