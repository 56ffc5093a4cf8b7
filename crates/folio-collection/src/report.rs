use std::fmt;

use serde::{Deserialize, Serialize};

/// One problem found by a validation hook.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Dotted path of the offending field; empty for record-level problems.
    pub field: String,
    pub message: String,
}

/// Structured outcome of validating a record or patch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    /// A report with no violations.
    pub fn valid() -> Self {
        Self::default()
    }

    /// A report with a single violation.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut report = Self::valid();
        report.push(field, message);
        report
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Append every violation of `other`.
    pub fn merge(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return write!(f, "valid");
        }
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            if v.field.is_empty() {
                write!(f, "{}", v.message)?;
            } else {
                write!(f, "{}: {}", v.field, v.message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_violations() {
        let mut report = ValidationReport::invalid("name", "must not be empty");
        report.push("", "record is stale");
        assert!(!report.is_valid());
        assert_eq!(report.to_string(), "name: must not be empty; record is stale");
    }

    #[test]
    fn merge_accumulates() {
        let mut report = ValidationReport::valid();
        assert!(report.is_valid());
        report.merge(ValidationReport::invalid("a", "bad"));
        assert_eq!(report.violations.len(), 1);
    }
}
