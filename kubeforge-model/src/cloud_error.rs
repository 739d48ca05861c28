use std::fmt;

use serde::{Deserialize, Serialize};

/// Codes the engine itself assigns when it surfaces an error to callers.
/// Provider codes pass through as plain strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudErrorCode {
    InternalServerError,
    DeploymentFailed,
    ResourceQuotaExceeded,
    RequestDisallowedByPolicy,
    InvalidTemplateDeployment,
    ZonalAllocationFailed,
    InvalidParameter,
    InvalidServicePrincipalCredentials,
}

impl CloudErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            CloudErrorCode::InternalServerError => "InternalServerError",
            CloudErrorCode::DeploymentFailed => "DeploymentFailed",
            CloudErrorCode::ResourceQuotaExceeded => "ResourceQuotaExceeded",
            CloudErrorCode::RequestDisallowedByPolicy => "RequestDisallowedByPolicy",
            CloudErrorCode::InvalidTemplateDeployment => "InvalidTemplateDeployment",
            CloudErrorCode::ZonalAllocationFailed => "ZonalAllocationFailed",
            CloudErrorCode::InvalidParameter => "InvalidParameter",
            CloudErrorCode::InvalidServicePrincipalCredentials => {
                "InvalidServicePrincipalCredentials"
            }
        }
    }
}

impl fmt::Display for CloudErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<CloudErrorBody>,
}

impl CloudErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for CloudErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.code, self.target, self.message)?;
        if !self.details.is_empty() {
            f.write_str(" Details: ")?;
            for (idx, detail) in self.details.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{detail}")?;
            }
        }
        Ok(())
    }
}

/// User-visible error attached to async operations. Only classified errors
/// carry provider text; everything else is the generic internal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudError {
    #[serde(skip)]
    pub status_code: u16,
    #[serde(rename = "error")]
    pub body: CloudErrorBody,
}

impl CloudError {
    pub fn new(status_code: u16, code: CloudErrorCode, target: &str, message: impl Into<String>) -> Self {
        Self {
            status_code,
            body: CloudErrorBody {
                code: code.as_str().to_string(),
                message: message.into(),
                target: target.to_string(),
                details: Vec::new(),
            },
        }
    }

    pub fn internal_server_error() -> Self {
        Self::new(500, CloudErrorCode::InternalServerError, "", "Internal server error.")
    }

    pub fn with_details(mut self, details: Vec<CloudErrorBody>) -> Self {
        self.body.details = details;
        self
    }

    pub fn is_user_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status_code, self.body)
    }
}

impl std::error::Error for CloudError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_log_format() {
        let err = CloudError::new(400, CloudErrorCode::DeploymentFailed, "", "Deployment failed.")
            .with_details(vec![CloudErrorBody::new("", r#"{"code":"InvalidTemplateDeployment"}"#)]);

        assert_eq!(
            err.to_string(),
            r#"400: DeploymentFailed: : Deployment failed. Details: : : {"code":"InvalidTemplateDeployment"}"#
        );
    }

    #[test]
    fn serializes_under_error_key() {
        let err = CloudError::internal_server_error();
        let value = serde_json::to_value(&err).expect("serialize cloud error");
        assert_eq!(value["error"]["code"], "InternalServerError");
        assert_eq!(value["error"]["message"], "Internal server error.");
        assert!(value.get("status_code").is_none());
    }
}
