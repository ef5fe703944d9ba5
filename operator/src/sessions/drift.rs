use crate::util::{self, Error, RUNNER_HTTP_TIMEOUT, conditions};
use ambient_code_types::{AgenticSession, ReconciledRepo, ReconciledWorkflow, RepoRef, condition_types};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq)]
pub struct RepoAddition {
    pub url: String,
    pub branch: Option<String>,
    pub name: String,
}

/// Computes which repos need adding/removing to converge `spec.repos`
/// against `status.reconciledRepos`, per spec.md §4.7. A pure function so
/// it can be unit-tested without a live runner or cluster.
pub fn repo_delta(spec_repos: &[RepoRef], reconciled: &[ReconciledRepo]) -> (Vec<RepoAddition>, Vec<String>) {
    let reconciled_urls: HashSet<&str> = reconciled.iter().map(|r| r.url.as_str()).collect();
    let spec_urls: HashSet<&str> = spec_repos.iter().map(|r| r.url.as_str()).collect();

    let additions = spec_repos
        .iter()
        .filter(|r| !reconciled_urls.contains(r.url.as_str()))
        .map(|r| RepoAddition {
            url: r.url.clone(),
            branch: r.branch.clone(),
            name: util::repo_name_from_url(&r.url),
        })
        .collect();
    let removals = reconciled
        .iter()
        .filter(|r| !spec_urls.contains(r.url.as_str()))
        .map(|r| r.name.clone())
        .collect();
    (additions, removals)
}

/// True when `spec.activeWorkflow`'s `(gitUrl, branch)` differ from
/// `status.reconciledWorkflow`'s — `path` is re-applied unconditionally
/// whenever the workflow is (re)applied (spec.md §4.7).
fn workflow_changed(
    desired: Option<&ambient_code_types::ActiveWorkflow>,
    reconciled: Option<&ReconciledWorkflow>,
) -> bool {
    match (desired, reconciled) {
        (None, None) => false,
        (Some(d), Some(r)) => d.git_url != r.git_url || d.branch != r.branch,
        _ => true,
    }
}

#[derive(Serialize)]
struct AddRepoBody<'a> {
    url: &'a str,
    branch: Option<&'a str>,
    name: &'a str,
}

#[derive(Serialize)]
struct RemoveRepoBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct WorkflowBody<'a> {
    #[serde(rename = "gitUrl")]
    git_url: &'a str,
    branch: &'a str,
    path: &'a str,
}

async fn post(client: &reqwest::Client, url: &str, body: &impl Serialize) -> Result<(), Error> {
    let response = client
        .post(url)
        .timeout(RUNNER_HTTP_TIMEOUT)
        .json(body)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(Error::RunnerRejected {
            endpoint: "runner",
            status: response.status().as_u16(),
        });
    }
    Ok(())
}

/// Converges `spec.repos` and `spec.activeWorkflow` against a running
/// runner's reported reconciled state, per spec.md §4.7. Individual repo
/// HTTP failures are logged and tolerated (the next pass recomputes the
/// delta); a workflow apply failure is returned so the caller withholds
/// `observedGeneration`.
pub async fn reconcile_drift(
    http: &reqwest::Client,
    runner_base_url: &str,
    instance: &AgenticSession,
    patch: &mut crate::util::patch::StatusPatch,
) -> Result<(), Error> {
    let generation = instance.meta().generation.unwrap_or_default();
    let (additions, removals) = repo_delta(&instance.spec.repos, &instance.status.as_ref().map(|s| s.reconciled_repos.clone()).unwrap_or_default());

    for addition in &additions {
        let url = format!("{runner_base_url}/repos/add");
        if let Err(e) = post(
            http,
            &url,
            &AddRepoBody {
                url: &addition.url,
                branch: addition.branch.as_deref(),
                name: &addition.name,
            },
        )
        .await
        {
            eprintln!("repo add {} failed: {e}", addition.url);
        }
    }
    for name in &removals {
        let url = format!("{runner_base_url}/repos/remove");
        if let Err(e) = post(http, &url, &RemoveRepoBody { name }).await {
            eprintln!("repo remove {name} failed: {e}");
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    let reconciled_repos: Vec<ReconciledRepo> = instance
        .spec
        .repos
        .iter()
        .map(|r| ReconciledRepo {
            url: r.url.clone(),
            branch: r.branch.clone(),
            name: util::repo_name_from_url(&r.url),
            status: "Ready".to_string(),
            cloned_at: now.clone(),
        })
        .collect();
    patch.set_field(move |status| status.reconciled_repos = reconciled_repos);
    patch.upsert_condition(conditions::make(
        condition_types::REPOS_RECONCILED,
        true,
        "Converged",
        "repo set converged with runner",
        generation,
    ));

    let reconciled_workflow = instance.status.as_ref().and_then(|s| s.reconciled_workflow.clone());
    if workflow_changed(instance.spec.active_workflow.as_ref(), reconciled_workflow.as_ref()) {
        if let Some(workflow) = &instance.spec.active_workflow {
            let url = format!("{runner_base_url}/workflow");
            match post(
                http,
                &url,
                &WorkflowBody {
                    git_url: &workflow.git_url,
                    branch: &workflow.branch,
                    path: &workflow.path,
                },
            )
            .await
            {
                Ok(()) => {
                    let applied = ReconciledWorkflow {
                        git_url: workflow.git_url.clone(),
                        branch: workflow.branch.clone(),
                        path: workflow.path.clone(),
                        status: "Active".to_string(),
                        applied_at: now.clone(),
                    };
                    patch.set_field(move |status| status.reconciled_workflow = Some(applied));
                    patch.upsert_condition(conditions::make(
                        condition_types::WORKFLOW_RECONCILED,
                        true,
                        "Applied",
                        "active workflow applied",
                        generation,
                    ));
                }
                Err(e) => {
                    patch.upsert_condition(conditions::make(
                        condition_types::WORKFLOW_RECONCILED,
                        false,
                        "ApplyFailed",
                        e.to_string(),
                        generation,
                    ));
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(url: &str) -> RepoRef {
        RepoRef {
            url: url.to_string(),
            branch: Some("main".to_string()),
        }
    }

    fn reconciled(url: &str, name: &str) -> ReconciledRepo {
        ReconciledRepo {
            url: url.to_string(),
            branch: Some("main".to_string()),
            name: name.to_string(),
            status: "Ready".to_string(),
            cloned_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn detects_pure_addition() {
        let spec = vec![repo("https://example.com/a.git")];
        let (additions, removals) = repo_delta(&spec, &[]);
        assert_eq!(additions.len(), 1);
        assert_eq!(additions[0].name, "a");
        assert!(removals.is_empty());
    }

    #[test]
    fn detects_pure_removal() {
        let reconciled = vec![reconciled("https://example.com/a.git", "a")];
        let (additions, removals) = repo_delta(&[], &reconciled);
        assert!(additions.is_empty());
        assert_eq!(removals, vec!["a".to_string()]);
    }

    #[test]
    fn unchanged_repos_yield_no_delta() {
        let spec = vec![repo("https://example.com/a.git")];
        let reconciled = vec![reconciled("https://example.com/a.git", "a")];
        let (additions, removals) = repo_delta(&spec, &reconciled);
        assert!(additions.is_empty());
        assert!(removals.is_empty());
    }

    #[test]
    fn workflow_unset_to_unset_is_unchanged() {
        assert!(!workflow_changed(None, None));
    }

    #[test]
    fn workflow_path_only_change_is_not_a_drift_trigger() {
        use ambient_code_types::ActiveWorkflow;
        let desired = ActiveWorkflow {
            git_url: "g1".to_string(),
            branch: "main".to_string(),
            path: "wf/x".to_string(),
        };
        let reconciled = ReconciledWorkflow {
            git_url: "g1".to_string(),
            branch: "main".to_string(),
            path: "wf/y".to_string(),
            status: "Active".to_string(),
            applied_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert!(!workflow_changed(Some(&desired), Some(&reconciled)));
    }
}
