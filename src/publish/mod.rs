//! Publishing: turn a generated fix into a branch, a commit, and a pull
//! request.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::fix::FixResult;
use crate::github::{CodeHost, FileBlob, GithubError};
use crate::sentry::Issue;

/// Everything decided up front for one fix: where the change lives and how
/// it is described. Assembled before any network call so the naming logic
/// stays testable on its own.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub branch_name: String,
    pub commit_message: String,
    pub pr_title: String,
    pub pr_body: String,
}

/// Branch for one proposed fix: `fix/<issue-id>-<UTC timestamp>`.
///
/// Issues are processed strictly one at a time, so second resolution keeps
/// names unique within a run. Two runs racing over the same issue can still
/// collide; that surfaces as a branch conflict on the second run.
pub fn branch_name(issue_id: &str, at: DateTime<Utc>) -> String {
    format!("fix/{}-{}", issue_id, at.format("%Y%m%d%H%M%S"))
}

pub fn change_request(
    issue: &Issue,
    fix: &FixResult,
    file_path: &str,
    at: DateTime<Utc>,
) -> ChangeRequest {
    let mut pr_body = String::new();
    pr_body.push_str(&format!("## Automated fix for Sentry issue #{}\n\n", issue.id));
    pr_body.push_str("### Issue Details\n");
    pr_body.push_str(&format!("- **Error:** {}\n", issue.title));
    pr_body.push_str(&format!("- **Sentry Link:** {}\n", issue.permalink));
    pr_body.push_str(&format!("- **File:** {}\n\n", file_path));
    pr_body.push_str("### AI Explanation\n");
    pr_body.push_str(&fix.explanation);
    pr_body.push_str("\n\n---\n*This PR was automatically generated by sentry-autofix*\n");

    ChangeRequest {
        branch_name: branch_name(&issue.id, at),
        commit_message: format!("Fix: {} (Sentry ID: {})", issue.title, issue.id),
        pr_title: format!("🤖 [AI Fix] {}", issue.title),
        pr_body,
    }
}

/// Push one fix out: branch off the default branch head, commit the
/// replacement file, open the pull request. Returns the PR's web URL.
///
/// The first failing step aborts the publish. An already-created branch is
/// left behind; nothing is rolled back.
#[instrument(skip(host, blob, fix, issue), fields(issue = %issue.id, path = %blob.path))]
pub async fn publish(
    host: &impl CodeHost,
    blob: &FileBlob,
    fix: &FixResult,
    issue: &Issue,
) -> Result<String, GithubError> {
    let request = change_request(issue, fix, &blob.path, Utc::now());

    let base_branch = host.default_branch().await?;
    debug!(base = %base_branch, branch = %request.branch_name, "creating fix branch");
    host.create_branch(&base_branch, &request.branch_name).await?;
    host.commit_file(
        &blob.path,
        &fix.fixed_code,
        &blob.sha,
        &request.branch_name,
        &request.commit_message,
    )
    .await?;
    host.open_pull_request(
        &request.pr_title,
        &request.pr_body,
        &request.branch_name,
        &base_branch,
    )
    .await
}
