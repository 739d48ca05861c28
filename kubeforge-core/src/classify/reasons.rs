use kubeforge_model::{CloudError, CloudErrorBody, CloudErrorCode};
use once_cell::sync::Lazy;
use regex::Regex;

/// A known install failure signature.
#[derive(Debug)]
pub struct FailureReason {
    pub name: &'static str,
    pub reason: &'static str,
    pub message: &'static str,
    pub code: CloudErrorCode,
    pub patterns: Vec<Regex>,
}

impl FailureReason {
    fn new(
        name: &'static str,
        reason: &'static str,
        message: &'static str,
        code: CloudErrorCode,
        patterns: &[&str],
    ) -> Self {
        Self {
            name,
            reason,
            message,
            code,
            patterns: patterns.iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }

    pub fn is_match(&self, install_log: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(install_log))
    }
}

/// Ordered; the first matching entry wins, so more specific signatures must
/// precede the generic ones they overlap with.
pub static REASONS: Lazy<Vec<FailureReason>> = Lazy::new(|| {
    vec![
        FailureReason::new(
            "AzureRequestDisallowedByPolicy",
            "AzureRequestDisallowedByPolicy",
            "Cluster Deployment was disallowed by policy. Please see install log for more information.",
            CloudErrorCode::RequestDisallowedByPolicy,
            &[r#""code":\s?"InvalidTemplateDeployment".*"code":\s?"RequestDisallowedByPolicy""#],
        ),
        FailureReason::new(
            "AzureInvalidTemplateDeployment",
            "AzureInvalidTemplateDeployment",
            "The template deployment failed. Please see install log for more information.",
            CloudErrorCode::InvalidTemplateDeployment,
            &[r#""code":\s?"InvalidTemplateDeployment""#],
        ),
        FailureReason::new(
            "AzureZonalAllocationFailed",
            "AzureZonalAllocationFailed",
            "Deployment failed due to ZonalAllocationFailed. Please see install log for more information.",
            CloudErrorCode::ZonalAllocationFailed,
            &[r#""code":\s?"ZonalAllocationFailed""#],
        ),
    ]
});

pub const UNKNOWN_ERROR: &str = "UnknownError";

/// Result of matching an install log against [`REASONS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedReason {
    pub name: &'static str,
    pub reason: &'static str,
    pub message: String,
    /// `None` for the unknown fallback.
    pub code: Option<CloudErrorCode>,
}

impl MatchedReason {
    pub fn is_known(&self) -> bool {
        self.code.is_some()
    }

    /// User-facing error for a known reason. The last JSON payload in the log
    /// is attached as detail so callers see the provider's own explanation.
    pub fn to_cloud_error(&self, install_log: &str) -> Option<CloudError> {
        let details = last_json_payload(install_log)
            .map(|payload| vec![CloudErrorBody::new("", payload)])
            .unwrap_or_default();
        Some(self.to_summary_error()?.with_details(details))
    }

    /// The reason's fixed message alone, without any text from the source.
    pub fn to_summary_error(&self) -> Option<CloudError> {
        let code = self.code?;
        Some(CloudError::new(400, code, "", self.message.clone()))
    }
}

pub fn identify_reason(install_log: &str) -> MatchedReason {
    REASONS
        .iter()
        .find(|reason| reason.is_match(install_log))
        .map(|reason| MatchedReason {
            name: reason.name,
            reason: reason.reason,
            message: reason.message.to_string(),
            code: Some(reason.code),
        })
        .unwrap_or_else(|| MatchedReason {
            name: UNKNOWN_ERROR,
            reason: UNKNOWN_ERROR,
            message: install_log.to_string(),
            code: None,
        })
}

fn last_json_payload(install_log: &str) -> Option<&str> {
    install_log
        .lines()
        .rev()
        .find_map(|line| line.find("{\"code\"").map(|idx| line[idx..].trim_end()))
}
