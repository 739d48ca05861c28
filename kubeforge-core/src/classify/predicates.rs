use kubeforge_model::CloudError;

use crate::cloud::{ProviderError, ServiceError};

pub const CODE_AUTHORIZATION_FAILED: &str = "AuthorizationFailed";
pub const CODE_DEPLOYMENT_ACTIVE: &str = "DeploymentActive";
pub const CODE_DEPLOYMENT_FAILED: &str = "DeploymentFailed";
pub const CODE_FORBIDDEN: &str = "Forbidden";
pub const CODE_INVALID_TEMPLATE_DEPLOYMENT: &str = "InvalidTemplateDeployment";
pub const CODE_LINKED_AUTHORIZATION_FAILED: &str = "LinkedAuthorizationFailed";
pub const CODE_RESOURCE_GROUP_NOT_FOUND: &str = "ResourceGroupNotFound";
pub const CODE_INVALID_PARAMETER: &str = "InvalidParameter";
pub const CODE_NOT_AVAILABLE_FOR_SUBSCRIPTION: &str = "NotAvailableForSubscription";
pub const CODE_QUOTA_EXCEEDED: &str = "QuotaExceeded";
pub const CODE_SKU_NOT_AVAILABLE: &str = "SkuNotAvailable";

/// Which machine profile a SKU error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmProfile {
    Unknown,
    Master,
    Worker,
}

/// True if the error is, or wraps, an AuthorizationFailed error.
pub fn is_authorization_failed_error(err: &ProviderError) -> bool {
    failed_due_to_auth_error(err, CODE_AUTHORIZATION_FAILED)
}

/// True if the error is, or wraps, a LinkedAuthorizationFailed error.
pub fn is_linked_authorization_failed_error(err: &ProviderError) -> bool {
    failed_due_to_auth_error(err, CODE_LINKED_AUTHORIZATION_FAILED)
}

fn failed_due_to_auth_error(err: &ProviderError, auth_code: &str) -> bool {
    let Some(service) = err.service_error.as_ref() else {
        return false;
    };

    if service.code == auth_code {
        return true;
    }

    // Deployments report authorization problems as a Forbidden detail whose
    // message is itself a serialized cloud error.
    service.code == CODE_DEPLOYMENT_FAILED
        && service.details.iter().any(|detail| {
            detail.code == CODE_FORBIDDEN
                && serde_json::from_str::<CloudError>(&detail.message)
                    .is_ok_and(|inner| inner.body.code == auth_code)
        })
}

/// ARM rejected a template pre-flight because role assignments have not
/// propagated yet.
pub fn is_deployment_missing_permissions_error(err: &ProviderError) -> bool {
    err.service_error.as_ref().is_some_and(|service| {
        service.code == CODE_INVALID_TEMPLATE_DEPLOYMENT
            && service.message.contains("Authorization failed for template resource")
    })
}

/// A deployment with the same name is already running.
pub fn is_deployment_active_error(err: &ProviderError) -> bool {
    has_code(err, CODE_DEPLOYMENT_ACTIVE)
}

/// Returns `(true, message)` when any deployment detail reports QuotaExceeded.
/// The message is provider text and is safe to surface to the caller.
pub fn is_resource_quota_exceeded_error(err: &ProviderError) -> (bool, String) {
    let quota = err.service_error.as_ref().and_then(|service| {
        service
            .details
            .iter()
            .find(|detail| detail.code == CODE_QUOTA_EXCEEDED)
    });

    match quota {
        Some(detail) => (true, detail.message.clone()),
        None => (false, String::new()),
    }
}

pub fn is_resource_group_not_found_error(err: &ProviderError) -> bool {
    has_code(err, CODE_RESOURCE_GROUP_NOT_FOUND)
}

pub fn is_not_found_error(err: &ProviderError) -> bool {
    err.status_code == Some(404)
}

pub fn is_4xx_error(err: &ProviderError) -> bool {
    err.status_code.is_some_and(|status| (400..500).contains(&status))
}

/// Throttling or an explicitly retryable nested error.
pub fn is_retryable_error(err: &ProviderError) -> bool {
    err.status_code == Some(429) || err.message.contains("RetryableError")
}

/// SKU availability problems, along with the profile they affect.
pub fn is_vm_sku_error(err: &ProviderError) -> (bool, VmProfile) {
    let text = err.message.as_str();

    if let Some(service) = err.service_error.as_ref() {
        if is_sku_code(&service.code) {
            return (true, detect_vm_profile(text));
        }
        if service.code == CODE_INVALID_PARAMETER && service.message.contains("SKU") {
            return (true, detect_vm_profile(text));
        }
    }

    if [
        CODE_SKU_NOT_AVAILABLE,
        CODE_NOT_AVAILABLE_FOR_SUBSCRIPTION,
        CODE_QUOTA_EXCEEDED,
    ]
    .iter()
    .any(|code| text.contains(code))
    {
        return (true, detect_vm_profile(text));
    }
    if text.contains(CODE_INVALID_PARAMETER) && text.contains("SKU") {
        return (true, detect_vm_profile(text));
    }
    if text.contains("not available in location") && text.contains("size") {
        return (true, detect_vm_profile(text));
    }

    (false, VmProfile::Unknown)
}

fn is_sku_code(code: &str) -> bool {
    code == CODE_SKU_NOT_AVAILABLE
        || code == CODE_NOT_AVAILABLE_FOR_SUBSCRIPTION
        || code == CODE_QUOTA_EXCEEDED
}

fn detect_vm_profile(text: &str) -> VmProfile {
    if text.contains("workerProfiles") || text.contains("WorkerProfiles") {
        VmProfile::Worker
    } else if text.contains("masterProfile") || text.contains("MasterProfile") {
        VmProfile::Master
    } else {
        VmProfile::Unknown
    }
}

/// AADSTS7000215: invalid client secret.
pub fn is_invalid_secret_error(err: &ProviderError) -> bool {
    err.message.contains("AADSTS7000215")
}

/// AADSTS700016: application not found in the directory, usually propagation delay.
pub fn is_unauthorized_client_error(err: &ProviderError) -> bool {
    err.message.contains("AADSTS700016")
}

/// AADSTS7000222: client secret keys expired.
pub fn is_client_secret_keys_expired(err: &ProviderError) -> bool {
    err.message.contains("AADSTS7000222")
}

fn has_code(err: &ProviderError, code: &str) -> bool {
    err.service_error
        .as_ref()
        .is_some_and(|service: &ServiceError| service.code == code)
}
