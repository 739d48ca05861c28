//! Template submission and the decision table applied to its outcome.

use std::time::Duration;

use kubeforge_model::{CloudError, CloudErrorBody, CloudErrorCode};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    classify::{
        VmProfile, is_authorization_failed_error, is_deployment_active_error,
        is_deployment_missing_permissions_error, is_linked_authorization_failed_error,
        is_resource_quota_exceeded_error, is_retryable_error, is_unauthorized_client_error,
        is_vm_sku_error,
    },
    cloud::{DeploymentsClient, ProviderError},
    error::{ClusterError, Result},
};

/// Deployment name shared by every template submitted for a cluster, so a
/// resubmission after a crash collides with (and waits for) the first one.
pub const DEPLOYMENT_NAME: &str = "kubeforge-deploy";

#[derive(Debug, Clone, Copy)]
pub struct DeployRetry {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Outcome of one submission attempt.
enum Attempt {
    Done,
    Retry(ProviderError),
}

/// Submit `template` and drive it to completion.
///
/// A deployment already running under the same name is awaited instead of
/// resubmitted. Throttling and a service principal that has not reached the
/// directory yet are retried until `retry.timeout`. Authorization failures
/// end the deployment on first sight and stay opaque. Quota and VM size
/// failures surface as user-facing bad requests; any other service error
/// becomes a generic deployment failure carrying the service error as its
/// only detail.
pub async fn deploy_template(
    deployments: &dyn DeploymentsClient,
    retry: DeployRetry,
    cancel: &CancellationToken,
    resource_group: &str,
    template_name: &str,
    template: &Value,
    parameters: &Value,
) -> Result<()> {
    let deadline = Instant::now() + retry.timeout;

    loop {
        match attempt(deployments, resource_group, template_name, template, parameters).await? {
            Attempt::Done => return Ok(()),
            Attempt::Retry(err) => {
                if Instant::now() + retry.interval > deadline {
                    warn!(template = template_name, error = %err, "giving up on template deployment");
                    return Err(ClusterError::Timeout {
                        what: format!("{template_name} template deployment"),
                        after: retry.timeout,
                    });
                }
                info!(template = template_name, error = %err, "transient deployment failure, retrying");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ClusterError::Cancelled(format!("deploying {template_name} template")));
            }
            _ = tokio::time::sleep(retry.interval) => {}
        }
    }
}

async fn attempt(
    deployments: &dyn DeploymentsClient,
    resource_group: &str,
    template_name: &str,
    template: &Value,
    parameters: &Value,
) -> Result<Attempt> {
    info!(template = template_name, "deploying template");
    let mut outcome = deployments
        .create_or_update_and_wait(resource_group, DEPLOYMENT_NAME, template, parameters)
        .await;

    if let Err(err) = &outcome
        && is_deployment_active_error(err)
    {
        info!(template = template_name, "waiting for template to be deployed");
        outcome = deployments.wait(resource_group, DEPLOYMENT_NAME).await;
    }

    match outcome {
        Ok(()) => Ok(Attempt::Done),
        Err(err) if is_authorization_error(&err) => {
            warn!(template = template_name, error = %err, "deployment not authorized");
            Err(err.into())
        }
        Err(err) if is_retryable_error(&err) || is_unauthorized_client_error(&err) => {
            Ok(Attempt::Retry(err))
        }
        Err(err) => Err(classify_deploy_failure(err)),
    }
}

fn is_authorization_error(err: &ProviderError) -> bool {
    is_authorization_failed_error(err)
        || is_linked_authorization_failed_error(err)
        || is_deployment_missing_permissions_error(err)
}

/// Map a terminal deployment failure to what the caller is allowed to see.
pub fn classify_deploy_failure(err: ProviderError) -> ClusterError {
    let (quota_exceeded, message) = is_resource_quota_exceeded_error(&err);
    if quota_exceeded {
        return CloudError::new(400, CloudErrorCode::ResourceQuotaExceeded, "", message).into();
    }

    let (sku_error, profile) = is_vm_sku_error(&err);
    if sku_error {
        let target = match profile {
            VmProfile::Master => "properties.masterProfile.vmSize",
            VmProfile::Worker => "properties.workerProfiles[0].vmSize",
            VmProfile::Unknown => "",
        };
        return CloudError::new(
            400,
            CloudErrorCode::InvalidParameter,
            target,
            "The selected VM size cannot be provisioned in this location or subscription.",
        )
        .into();
    }

    match &err.service_error {
        Some(service_error) => {
            let detail = match serde_json::to_string(service_error) {
                Ok(json) => json,
                Err(e) => return e.into(),
            };
            CloudError::new(400, CloudErrorCode::DeploymentFailed, "", "Deployment failed.")
                .with_details(vec![CloudErrorBody::new("", detail)])
                .into()
        }
        None => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;
    use crate::cloud::{ProviderResult, ServiceError, ServiceErrorDetail};

    /// Replays scripted results and records every call.
    #[derive(Default)]
    struct ScriptedDeployments {
        submits: Mutex<VecDeque<ProviderResult<()>>>,
        waits: Mutex<VecDeque<ProviderResult<()>>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl ScriptedDeployments {
        fn new(submits: Vec<ProviderResult<()>>, waits: Vec<ProviderResult<()>>) -> Arc<Self> {
            Arc::new(Self {
                submits: Mutex::new(submits.into()),
                waits: Mutex::new(waits.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DeploymentsClient for ScriptedDeployments {
        async fn create_or_update_and_wait(
            &self,
            _: &str,
            _: &str,
            _: &Value,
            _: &Value,
        ) -> ProviderResult<()> {
            self.calls.lock().await.push("submit");
            self.submits.lock().await.pop_front().unwrap_or(Ok(()))
        }

        async fn wait(&self, _: &str, _: &str) -> ProviderResult<()> {
            self.calls.lock().await.push("wait");
            self.waits.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    fn retry() -> DeployRetry {
        DeployRetry {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }

    async fn deploy(client: &ScriptedDeployments) -> Result<()> {
        deploy_template(
            client,
            retry(),
            &CancellationToken::new(),
            "rg",
            "storage",
            &json!({}),
            &json!({}),
        )
        .await
    }

    fn service(code: &str) -> ProviderError {
        ProviderError::service(400, ServiceError::new(code, "boom"))
    }

    #[tokio::test(start_paused = true)]
    async fn active_deployment_is_awaited_not_resubmitted() {
        let client = ScriptedDeployments::new(
            vec![Err(ProviderError::service(409, ServiceError::new("DeploymentActive", "busy")))],
            vec![Ok(())],
        );
        deploy(&client).await.expect("deployment completes");
        assert_eq!(*client.calls.lock().await, vec!["submit", "wait"]);
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_failures_fail_on_first_sight() {
        for code in ["AuthorizationFailed", "LinkedAuthorizationFailed"] {
            let client = ScriptedDeployments::new(vec![Err(service(code)), Ok(())], vec![]);

            let err = deploy(&client).await.expect_err("not authorized");
            assert!(matches!(err, ClusterError::Provider(_)), "{code}: {err}");
            assert!(err.cloud_error().is_none());
            assert_eq!(*client.calls.lock().await, vec!["submit"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_template_permissions_are_not_retried() {
        let client = ScriptedDeployments::new(
            vec![Err(ProviderError::service(
                400,
                ServiceError::new(
                    "InvalidTemplateDeployment",
                    "Authorization failed for template resource 'vnet' of type 'Microsoft.Network/virtualNetworks'.",
                ),
            ))],
            vec![],
        );

        let err = deploy(&client).await.expect_err("not authorized");
        assert!(matches!(err, ClusterError::Provider(_)));
        assert_eq!(client.calls.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttling_is_retried_until_the_deadline() {
        let client = ScriptedDeployments::new(
            vec![
                Err(ProviderError::service(429, ServiceError::new("TooManyRequests", "slow down"))),
                Err(ProviderError::other("AADSTS700016: application not found in the directory")),
            ],
            vec![],
        );
        deploy(&client).await.expect("third attempt succeeds");
        assert_eq!(client.calls.lock().await.len(), 3);

        let submits = (0..100)
            .map(|_| Err(ProviderError::service(429, ServiceError::new("TooManyRequests", "slow down"))))
            .collect();
        let client = ScriptedDeployments::new(submits, vec![]);
        let err = deploy(&client).await.expect_err("always throttled");
        assert!(matches!(err, ClusterError::Timeout { .. }));
        let attempts = client.calls.lock().await.len();
        assert!((60..=61).contains(&attempts), "attempts = {attempts}");
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_vm_size_is_an_invalid_parameter() {
        let client = ScriptedDeployments::new(
            vec![Err(ProviderError::service(
                400,
                ServiceError::new(
                    "SkuNotAvailable",
                    "The requested size for resource 'workerProfiles' is currently not available.",
                ),
            ))],
            vec![],
        );

        let err = deploy(&client).await.expect_err("sku unavailable");
        let cloud = err.cloud_error().expect("classified");
        assert_eq!(cloud.body.code, "InvalidParameter");
        assert_eq!(cloud.body.target, "properties.workerProfiles[0].vmSize");
    }

    #[tokio::test(start_paused = true)]
    async fn quota_failures_surface_provider_message() {
        let quota = ProviderError::service(
            400,
            ServiceError::new("DeploymentFailed", "failed").with_details(vec![
                ServiceErrorDetail::new("QuotaExceeded", "Operation results in exceeding quota limits of Core."),
            ]),
        );
        let client = ScriptedDeployments::new(vec![Err(quota)], vec![]);

        let err = deploy(&client).await.expect_err("quota");
        let cloud = err.cloud_error().expect("classified");
        assert_eq!(cloud.status_code, 400);
        assert_eq!(cloud.body.code, "ResourceQuotaExceeded");
        assert_eq!(cloud.body.message, "Operation results in exceeding quota limits of Core.");
    }

    #[tokio::test(start_paused = true)]
    async fn other_service_errors_become_deployment_failed() {
        let client = ScriptedDeployments::new(vec![Err(service("InvalidTemplate"))], vec![]);

        let err = deploy(&client).await.expect_err("invalid template");
        let cloud = err.cloud_error().expect("classified");
        assert_eq!(cloud.body.code, "DeploymentFailed");
        assert_eq!(cloud.body.message, "Deployment failed.");
        assert_eq!(cloud.body.details.len(), 1);
        let detail: ServiceError =
            serde_json::from_str(&cloud.body.details[0].message).expect("service error json");
        assert_eq!(detail.code, "InvalidTemplate");
    }

    #[tokio::test(start_paused = true)]
    async fn non_service_errors_stay_opaque() {
        let client =
            ScriptedDeployments::new(vec![Err(ProviderError::other("connection reset"))], vec![]);

        let err = deploy(&client).await.expect_err("transport failure");
        assert!(err.cloud_error().is_none());
        assert!(matches!(err, ClusterError::Provider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_wait_goes_through_the_same_table() {
        let client = ScriptedDeployments::new(
            vec![Err(ProviderError::service(409, ServiceError::new("DeploymentActive", "busy")))],
            vec![Err(service("Conflict"))],
        );
        let err = deploy(&client).await.expect_err("wait failed");
        assert_eq!(err.cloud_error().expect("classified").body.code, "DeploymentFailed");
    }
}
