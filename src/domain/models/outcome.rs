//! Step outcomes and the error taxonomy that drives retry decisions.

use serde::{Deserialize, Serialize};

/// Categorized failure kinds surfaced by step executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network blip, interrupted transfer channel, or similar transient fault
    TransientIo,
    /// No free accelerator slot; the case stays pending, this is not a failure
    ResourceExhausted,
    /// A local conversion tool exited non-zero
    ExternalTool,
    /// Remote host rejected the credential
    RemoteAuth,
    /// Remote host unreachable
    RemoteConnect,
    /// Partial or total bulk transfer failure
    Transfer,
    /// Remote completion marker never appeared within the polling bound
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientIo => "transient_io",
            Self::ResourceExhausted => "resource_exhausted",
            Self::ExternalTool => "external_tool",
            Self::RemoteAuth => "remote_auth",
            Self::RemoteConnect => "remote_connect",
            Self::Transfer => "transfer",
            Self::Timeout => "timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "transient_io" => Some(Self::TransientIo),
            "resource_exhausted" => Some(Self::ResourceExhausted),
            "external_tool" => Some(Self::ExternalTool),
            "remote_auth" => Some(Self::RemoteAuth),
            "remote_connect" => Some(Self::RemoteConnect),
            "transfer" => Some(Self::Transfer),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    /// What the workflow should do with a step attempt that failed this way.
    pub fn disposition(&self) -> FailureDisposition {
        match self {
            Self::TransientIo | Self::ExternalTool | Self::Transfer => {
                FailureDisposition::RetryWithinBudget
            }
            Self::RemoteAuth | Self::RemoteConnect => FailureDisposition::FailPermanently,
            Self::Timeout => FailureDisposition::MarkStuck,
            Self::ResourceExhausted => FailureDisposition::LeavePending,
        }
    }

    /// Whether this kind is retryable within the per-step attempt budget.
    pub fn is_transient(&self) -> bool {
        self.disposition() == FailureDisposition::RetryWithinBudget
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Workflow-level reaction to a failed step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Retry with backoff until the attempt budget runs out, then fail
    RetryWithinBudget,
    /// Transition the case to Failed immediately and release resources
    FailPermanently,
    /// Mark the case Stuck; reconciliation requeues it later
    MarkStuck,
    /// Not an error: leave the case pending for the next cycle
    LeavePending,
}

/// Result of a single step execution attempt.
///
/// Executors never propagate errors as `Err`; every failure path is captured
/// here with its categorized kind and whatever output was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// None on success
    pub error_kind: Option<ErrorKind>,
}

impl StepOutcome {
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(0),
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: None,
            error_kind: Some(kind),
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Short human-readable summary for status events and logs.
    pub fn summary(&self) -> String {
        if self.success {
            "ok".to_string()
        } else {
            let kind = self
                .error_kind
                .map_or("unknown", |k| k.as_str());
            let detail = self.stderr.lines().next().unwrap_or("");
            if detail.is_empty() {
                kind.to_string()
            } else {
                format!("{kind}: {detail}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispositions() {
        assert_eq!(
            ErrorKind::TransientIo.disposition(),
            FailureDisposition::RetryWithinBudget
        );
        assert_eq!(
            ErrorKind::Transfer.disposition(),
            FailureDisposition::RetryWithinBudget
        );
        assert_eq!(
            ErrorKind::ExternalTool.disposition(),
            FailureDisposition::RetryWithinBudget
        );
        assert_eq!(
            ErrorKind::RemoteAuth.disposition(),
            FailureDisposition::FailPermanently
        );
        assert_eq!(
            ErrorKind::RemoteConnect.disposition(),
            FailureDisposition::FailPermanently
        );
        assert_eq!(ErrorKind::Timeout.disposition(), FailureDisposition::MarkStuck);
        assert_eq!(
            ErrorKind::ResourceExhausted.disposition(),
            FailureDisposition::LeavePending
        );
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ErrorKind::TransientIo,
            ErrorKind::ResourceExhausted,
            ErrorKind::ExternalTool,
            ErrorKind::RemoteAuth,
            ErrorKind::RemoteConnect,
            ErrorKind::Transfer,
            ErrorKind::Timeout,
        ] {
            assert_eq!(ErrorKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_outcome_summary() {
        let ok = StepOutcome::success("done", "");
        assert_eq!(ok.summary(), "ok");

        let failed = StepOutcome::failure(ErrorKind::ExternalTool, "segfault at line 3\nmore");
        assert_eq!(failed.summary(), "external_tool: segfault at line 3");
    }
}
