//! Pre-flight validation results.

use serde::{Deserialize, Serialize};

/// Outcome of an executor's pre-flight check.
///
/// Errors are fatal and prevent execution. Warnings are informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the configuration may be executed.
    pub valid: bool,
    /// Fatal problems, in the order they were found.
    pub errors: Vec<String>,
    /// Non-blocking remarks, in the order they were found.
    pub warnings: Vec<String>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// An empty, valid result.
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a fatal error. The result becomes invalid.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    /// Record a warning. Validity is unchanged.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Builder form of [`add_error`](Self::add_error).
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.add_error(message);
        self
    }

    /// Builder form of [`add_warning`](Self::add_warning).
    pub fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.add_warning(message);
        self
    }

    /// Append another result, prefixing each message with `scope`.
    pub fn merge_scoped(&mut self, scope: &str, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors
            .extend(other.errors.into_iter().map(|e| format!("{scope}: {e}")));
        self.warnings
            .extend(other.warnings.into_iter().map(|w| format!("{scope}: {w}")));
    }

    /// Check if the result allows execution.
    pub fn is_valid(&self) -> bool {
        self.valid && self.errors.is_empty()
    }
}
