use std::time::Duration;

use kubeforge_model::InstallPhase;

/// Work that runs once and either succeeds or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EnsureClusterSecrets,
    ResolveGraph,
    DeployStorageTemplate,
    LoadGraph,
    DeployResourcesTemplate,
    RemoveBootstrapResources,
    RemoveBootstrapIgnition,
    AdvancePhase,
    FinishInstallation,
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Action::EnsureClusterSecrets => "ensure_cluster_secrets",
            Action::ResolveGraph => "resolve_graph",
            Action::DeployStorageTemplate => "deploy_storage_template",
            Action::LoadGraph => "load_graph",
            Action::DeployResourcesTemplate => "deploy_resources_template",
            Action::RemoveBootstrapResources => "remove_bootstrap_resources",
            Action::RemoveBootstrapIgnition => "remove_bootstrap_ignition",
            Action::AdvancePhase => "advance_phase",
            Action::FinishInstallation => "finish_installation",
        }
    }
}

/// External convergence signal polled until it reports true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    BootstrapConfigMapReady,
    ApiServersReady,
    ClusterVersionReady,
}

impl Condition {
    pub fn name(self) -> &'static str {
        match self {
            Condition::BootstrapConfigMapReady => "bootstrap_config_map_ready",
            Condition::ApiServersReady => "api_servers_ready",
            Condition::ClusterVersionReady => "cluster_version_ready",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Action(Action),
    Condition(Condition, Duration),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Action(action) => action.name(),
            Step::Condition(condition, _) => condition.name(),
        }
    }
}

/// Ordered steps of `phase`. Every table ends by committing its phase, so a
/// crash anywhere before that re-runs the phase from the top.
pub fn phase_steps(phase: InstallPhase, condition_timeout: Duration) -> Vec<Step> {
    match phase {
        InstallPhase::DeployStorage => vec![
            Step::Action(Action::EnsureClusterSecrets),
            Step::Action(Action::ResolveGraph),
            Step::Action(Action::DeployStorageTemplate),
            Step::Action(Action::AdvancePhase),
        ],
        InstallPhase::DeployResources => vec![
            Step::Action(Action::LoadGraph),
            Step::Action(Action::DeployResourcesTemplate),
            Step::Condition(Condition::BootstrapConfigMapReady, condition_timeout),
            Step::Action(Action::AdvancePhase),
        ],
        InstallPhase::RemoveBootstrap => vec![
            Step::Action(Action::RemoveBootstrapResources),
            Step::Action(Action::RemoveBootstrapIgnition),
            Step::Condition(Condition::ApiServersReady, condition_timeout),
            Step::Condition(Condition::ClusterVersionReady, condition_timeout),
            Step::Action(Action::FinishInstallation),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_commits_last() {
        for phase in InstallPhase::ALL {
            let steps = phase_steps(phase, Duration::from_secs(1800));
            let last = steps.last().copied();
            let expected = match phase.next() {
                Some(_) => Step::Action(Action::AdvancePhase),
                None => Step::Action(Action::FinishInstallation),
            };
            assert_eq!(last, Some(expected), "phase {phase}");
        }
    }

    #[test]
    fn secrets_are_ensured_before_the_graph_is_resolved() {
        let steps = phase_steps(InstallPhase::DeployStorage, Duration::from_secs(1));
        let names: Vec<_> = steps.iter().map(Step::name).collect();
        assert_eq!(
            names,
            vec![
                "ensure_cluster_secrets",
                "resolve_graph",
                "deploy_storage_template",
                "advance_phase"
            ]
        );
    }
}
