use std::{borrow::Cow, fmt};

use kubeforge_model::{CloudError, CloudErrorCode};

use crate::error::ClusterError;

use super::{
    predicates::{
        is_client_secret_keys_expired, is_invalid_secret_error, is_resource_quota_exceeded_error,
    },
    reasons::identify_reason,
};

/// What is being classified: an error returned by the engine, or a raw
/// install log collected from a failed run.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Error(&'a ClusterError),
    InstallLog(&'a str),
}

impl Subject<'_> {
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Subject::Error(err) => Cow::Owned(err.to_string()),
            Subject::InstallLog(log) => Cow::Borrowed(*log),
        }
    }
}

/// One stage of the user-visible error decision.
pub trait Classifier: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// `Some` claims the subject and stops the pipeline.
    fn classify(&self, subject: &Subject<'_>) -> Option<CloudError>;
}

/// Errors that were already classified where they happened (deploy decision
/// table, quota checks) pass through untouched.
#[derive(Debug, Default)]
pub struct CloudErrorPassthrough;

impl Classifier for CloudErrorPassthrough {
    fn name(&self) -> &'static str {
        "cloud-error"
    }

    fn classify(&self, subject: &Subject<'_>) -> Option<CloudError> {
        match subject {
            Subject::Error(err) => err.cloud_error().cloned(),
            Subject::InstallLog(_) => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct QuotaExceeded;

impl Classifier for QuotaExceeded {
    fn name(&self) -> &'static str {
        "quota-exceeded"
    }

    fn classify(&self, subject: &Subject<'_>) -> Option<CloudError> {
        let Subject::Error(err) = subject else {
            return None;
        };
        let (exceeded, message) = is_resource_quota_exceeded_error(err.provider_error()?);
        exceeded.then(|| CloudError::new(400, CloudErrorCode::ResourceQuotaExceeded, "", message))
    }
}

/// The cluster's service principal secret was rejected by the directory.
#[derive(Debug, Default)]
pub struct InvalidCredentials;

impl Classifier for InvalidCredentials {
    fn name(&self) -> &'static str {
        "invalid-credentials"
    }

    fn classify(&self, subject: &Subject<'_>) -> Option<CloudError> {
        let Subject::Error(err) = subject else {
            return None;
        };
        let provider = err.provider_error()?;
        (is_invalid_secret_error(provider) || is_client_secret_keys_expired(provider)).then(|| {
            CloudError::new(
                400,
                CloudErrorCode::InvalidServicePrincipalCredentials,
                "properties.servicePrincipalProfile",
                "The provided service principal credentials are invalid or expired.",
            )
        })
    }
}

/// Regex signatures over error text or install logs. Only install logs
/// contribute their provider payload as detail; error text never reaches
/// the caller.
#[derive(Debug, Default)]
pub struct KnownFailureReasons;

impl Classifier for KnownFailureReasons {
    fn name(&self) -> &'static str {
        "failure-reasons"
    }

    fn classify(&self, subject: &Subject<'_>) -> Option<CloudError> {
        match subject {
            Subject::InstallLog(log) => identify_reason(log).to_cloud_error(log),
            Subject::Error(_) => identify_reason(&subject.text()).to_summary_error(),
        }
    }
}

/// Ordered chain of classifiers; the first stage that claims a subject wins.
/// Anything unclaimed collapses to the generic internal error.
#[derive(Debug)]
pub struct UserErrorPipeline {
    stages: Vec<Box<dyn Classifier>>,
}

impl Default for UserErrorPipeline {
    fn default() -> Self {
        Self::empty()
            .with_stage(CloudErrorPassthrough)
            .with_stage(QuotaExceeded)
            .with_stage(InvalidCredentials)
            .with_stage(KnownFailureReasons)
    }
}

impl UserErrorPipeline {
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn with_stage(mut self, stage: impl Classifier + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn classify(&self, subject: &Subject<'_>) -> Option<CloudError> {
        self.stages.iter().find_map(|stage| stage.classify(subject))
    }

    /// The error a caller is allowed to see for `err`.
    pub fn user_visible(&self, err: &ClusterError) -> CloudError {
        self.classify(&Subject::Error(err))
            .unwrap_or_else(CloudError::internal_server_error)
    }

    /// User-facing error for a failed install's gathered log, if any stage
    /// recognises it.
    pub fn classify_install_log(&self, install_log: &str) -> Option<CloudError> {
        self.classify(&Subject::InstallLog(install_log))
    }
}
