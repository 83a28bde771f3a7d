// ABOUTME: Error types for the reconciliation engine including ErrorCode enum and EngineError struct.
// ABOUTME: Provides categorized errors with convenience constructors and boolean helpers.

use std::fmt;

/// Error codes representing the categories of engine failures.
///
/// None of these are fatal once a runtime is running: a failing rule is
/// treated as non-matching for the pass that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidSelector,
    InvalidPattern,
    InvalidUrl,
    InvalidPolicy,
    AttachPointUnavailable,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidSelector => "invalid selector",
            ErrorCode::InvalidPattern => "invalid path pattern",
            ErrorCode::InvalidUrl => "invalid URL",
            ErrorCode::InvalidPolicy => "invalid policy",
            ErrorCode::AttachPointUnavailable => "attach point unavailable",
        };
        write!(f, "{}", s)
    }
}

/// The main error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub struct EngineError {
    pub code: ErrorCode,
    pub op: String,
    pub subject: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quietpage: {} {}: {}", self.op, self.subject, self.code)?;
        if let Some(ref src) = self.source {
            write!(f, ": {}", src)?;
        }
        Ok(())
    }
}

impl EngineError {
    fn new(
        code: ErrorCode,
        op: impl Into<String>,
        subject: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self {
            code,
            op: op.into(),
            subject: subject.into(),
            source,
        }
    }

    /// Create an InvalidSelector error (a rule that cannot be evaluated).
    pub fn invalid_selector(
        selector: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::InvalidSelector, op, selector, source)
    }

    /// Create an InvalidPattern error.
    pub fn invalid_pattern(
        pattern: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::InvalidPattern, op, pattern, source)
    }

    /// Create an InvalidUrl error.
    pub fn invalid_url(
        url: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::InvalidUrl, op, url, source)
    }

    /// Create an InvalidPolicy error.
    pub fn invalid_policy(
        policy: impl Into<String>,
        op: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::new(ErrorCode::InvalidPolicy, op, policy, source)
    }

    /// Create an AttachPointUnavailable error.
    pub fn attach_point_unavailable(selector: impl Into<String>, op: impl Into<String>) -> Self {
        Self::new(ErrorCode::AttachPointUnavailable, op, selector, None)
    }

    /// Returns true if this is an InvalidSelector error.
    pub fn is_invalid_selector(&self) -> bool {
        self.code == ErrorCode::InvalidSelector
    }

    /// Returns true if this is an InvalidPattern error.
    pub fn is_invalid_pattern(&self) -> bool {
        self.code == ErrorCode::InvalidPattern
    }

    /// Returns true if this is an InvalidUrl error.
    pub fn is_invalid_url(&self) -> bool {
        self.code == ErrorCode::InvalidUrl
    }

    /// Returns true if this is an InvalidPolicy error.
    pub fn is_invalid_policy(&self) -> bool {
        self.code == ErrorCode::InvalidPolicy
    }

    /// Returns true if this is an AttachPointUnavailable error.
    pub fn is_attach_point_unavailable(&self) -> bool {
        self.code == ErrorCode::AttachPointUnavailable
    }
}
