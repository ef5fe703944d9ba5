use std::time::Duration;

pub mod conditions;
pub mod patch;

#[cfg(feature = "metrics")]
pub mod metrics;

pub(crate) mod colors;

mod error;

pub use error::*;

/// The default interval for requeuing a managed resource once it has
/// converged (§4.6 rules 5/7). The pod monitor's own 5s tick lives in
/// `sessions::monitor`.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Name of the kubernetes resource manager used for server-side apply.
pub(crate) const MANAGER_NAME: &str = "ambient-code-operator";

/// Refresh TTL for runner tokens (§4.2 `EnsureFreshToken`).
pub(crate) const TOKEN_REFRESH_TTL: Duration = Duration::from_secs(45 * 60);

/// Runner HTTP call timeout (§4.7, §5).
pub(crate) const RUNNER_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Secret-copy API call timeout (§5).
pub(crate) const SECRET_COPY_TIMEOUT: Duration = Duration::from_secs(30);

/// Derives the runner's repo name from its URL: last path segment, with a
/// trailing `.git` stripped (§4.7).
pub fn repo_name_from_url(url: &str) -> String {
    let last = url.rsplit('/').next().unwrap_or(url);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_strips_git_suffix() {
        assert_eq!(
            repo_name_from_url("https://example.com/org/a.git"),
            "a".to_string()
        );
    }

    #[test]
    fn repo_name_without_git_suffix() {
        assert_eq!(repo_name_from_url("https://example.com/org/a"), "a".to_string());
    }
}
