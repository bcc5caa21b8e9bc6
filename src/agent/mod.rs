//! The fix agent: drives every unresolved issue through the
//! fetch → localize → generate → publish pipeline.

pub mod state;

use tracing::{debug, error, info, instrument, warn};

use crate::fix;
use crate::gemini::TextModel;
use crate::github::CodeHost;
use crate::publish;
use crate::sentry::{extract_stack_context, Issue, IssueSource, SentryError};

use state::{IllegalTransition, IssueState, IssueStateMachine};

/// Terminal result for one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// Fix PR opened at this URL.
    Published { pr_url: String },
    /// Abandoned without error: nothing to localize, read, or apply.
    Skipped { reason: String },
    /// A stage errored. The batch moves on to the next issue.
    Failed { reason: String },
}

/// Outcome counts for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &IssueOutcome) {
        self.processed += 1;
        match outcome {
            IssueOutcome::Published { .. } => self.published += 1,
            IssueOutcome::Skipped { .. } => self.skipped += 1,
            IssueOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Orchestrates one batch: lists unresolved issues and takes each through
/// the pipeline, strictly one at a time. A failure in one issue never stops
/// the batch.
pub struct FixAgent<S, H, M> {
    sentry: S,
    github: H,
    model: M,
}

impl<S: IssueSource, H: CodeHost, M: TextModel> FixAgent<S, H, M> {
    pub fn new(sentry: S, github: H, model: M) -> Self {
        Self {
            sentry,
            github,
            model,
        }
    }

    /// Run one batch over the current unresolved issue list.
    ///
    /// Nothing is remembered between runs: an issue still unresolved on the
    /// next run gets a fresh branch and a second pull request.
    pub async fn run(&self) -> Result<RunSummary, SentryError> {
        let issues = self.sentry.list_unresolved().await?;
        info!(count = issues.len(), "fetched unresolved issues");

        let mut summary = RunSummary::default();
        for issue in &issues {
            info!(issue = %issue.id, title = %issue.title, "processing issue");
            let outcome = self.process_issue(issue).await;
            match &outcome {
                IssueOutcome::Published { pr_url } => {
                    info!(issue = %issue.id, %pr_url, "opened fix PR");
                }
                IssueOutcome::Skipped { reason } => {
                    warn!(issue = %issue.id, %reason, "skipped issue");
                }
                IssueOutcome::Failed { reason } => {
                    error!(issue = %issue.id, %reason, "issue processing failed");
                }
            }
            summary.record(&outcome);
        }

        info!(
            processed = summary.processed,
            published = summary.published,
            skipped = summary.skipped,
            failed = summary.failed,
            "run complete"
        );
        Ok(summary)
    }

    /// Take one issue through the pipeline, isolating any failure.
    #[instrument(skip(self, issue), fields(issue = %issue.id))]
    async fn process_issue(&self, issue: &Issue) -> IssueOutcome {
        let mut machine = IssueStateMachine::new();
        let outcome = match self.drive(issue, &mut machine).await {
            Ok(outcome) => outcome,
            // A transition the stage code should never attempt. Counts as a
            // failure for this issue; the batch keeps going.
            Err(err) => IssueOutcome::Failed {
                reason: err.to_string(),
            },
        };
        debug!(state = %machine.current(), path = %machine.summary(), "issue pipeline finished");
        outcome
    }

    async fn drive(
        &self,
        issue: &Issue,
        machine: &mut IssueStateMachine,
    ) -> Result<IssueOutcome, IllegalTransition> {
        let event = match self.sentry.latest_event(&issue.id).await {
            Ok(event) => event,
            Err(err) => return fail(machine, format!("fetching latest event: {err}")),
        };
        machine.advance(IssueState::ExtractContext, None)?;

        let context = match extract_stack_context(&event) {
            Some(context) => context,
            None => return skip(machine, "no usable stack frame in latest event".to_string()),
        };
        info!(file = %context.file_path, line = context.line_number, "localized fault");
        machine.advance(IssueState::ReadFile, None)?;

        // A file that cannot be read (not in the repository, renamed, not
        // UTF-8) cannot be fixed from here. Skip, not fail.
        let blob = match self.github.read_file(&context.file_path).await {
            Ok(blob) => blob,
            Err(err) => {
                return skip(machine, format!("could not read {}: {err}", context.file_path))
            }
        };
        // The contents API answers 2xx with an empty content field for blobs
        // over 1 MB. An empty body leaves nothing to prompt against.
        if blob.content.is_empty() {
            return skip(machine, format!("no content returned for {}", context.file_path));
        }
        machine.advance(IssueState::GenerateFix, None)?;

        let prompt = fix::build_prompt(&issue.title, &blob.content, &context);
        let fix = match fix::generate(&self.model, &prompt).await {
            Ok(fix) => fix,
            Err(err) => return skip(machine, format!("no usable fix: {err}")),
        };
        machine.advance(IssueState::Publish, None)?;

        let pr_url = match publish::publish(&self.github, &blob, &fix, issue).await {
            Ok(url) => url,
            Err(err) => return fail(machine, format!("publishing fix: {err}")),
        };
        machine.advance(IssueState::Done, None)?;

        Ok(IssueOutcome::Published { pr_url })
    }
}

fn skip(
    machine: &mut IssueStateMachine,
    reason: String,
) -> Result<IssueOutcome, IllegalTransition> {
    machine.skip(&reason)?;
    Ok(IssueOutcome::Skipped { reason })
}

fn fail(
    machine: &mut IssueStateMachine,
    reason: String,
) -> Result<IssueOutcome, IllegalTransition> {
    machine.fail(&reason)?;
    Ok(IssueOutcome::Failed { reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::gemini::GeminiError;
    use crate::github::{FileBlob, GithubError};
    use crate::sentry::types::{Entry, EntryData, Event, ExceptionValue, Frame, Stacktrace};

    const GOOD_REPLY: &str = "EXPLANATION:\nGuard the dictionary access.\nFIXED_CODE:\n```python\ndef handler(data):\n    return data.get('user_id')\n```";

    fn issue(id: &str, title: &str) -> Issue {
        Issue {
            id: id.to_string(),
            title: title.to_string(),
            permalink: format!("https://sentry.io/organizations/acme/issues/{id}/"),
        }
    }

    fn crashing_event() -> Event {
        Event {
            entries: vec![Entry {
                data: EntryData {
                    values: vec![ExceptionValue {
                        stacktrace: Some(Stacktrace {
                            frames: vec![Frame {
                                filename: Some("app.py".to_string()),
                                lineno: Some(2),
                                context_line: Some("    value = data['user_id']".to_string()),
                                pre_context: Some(vec!["def handler(data):".to_string()]),
                                post_context: Some(vec!["    return value".to_string()]),
                                function: Some("handler".to_string()),
                            }],
                        }),
                    }],
                },
            }],
        }
    }

    struct FakeSentry {
        issues: Vec<Issue>,
        event: Event,
        broken_event_ids: Vec<String>,
    }

    impl FakeSentry {
        fn with_issues(issues: Vec<Issue>) -> Self {
            Self {
                issues,
                event: crashing_event(),
                broken_event_ids: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl IssueSource for FakeSentry {
        async fn list_unresolved(&self) -> Result<Vec<Issue>, SentryError> {
            Ok(self.issues.clone())
        }

        async fn latest_event(&self, issue_id: &str) -> Result<Event, SentryError> {
            if self.broken_event_ids.iter().any(|id| id == issue_id) {
                return Err(SentryError::Api {
                    status: 500,
                    body: "internal error".to_string(),
                });
            }
            Ok(self.event.clone())
        }
    }

    #[derive(Default)]
    struct FakeHost {
        missing_file: bool,
        empty_file: bool,
        stale_first_commit: AtomicBool,
        branches: Arc<Mutex<Vec<String>>>,
        commits: Arc<Mutex<Vec<(String, String)>>>,
        prs: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl CodeHost for FakeHost {
        async fn default_branch(&self) -> Result<String, GithubError> {
            Ok("main".to_string())
        }

        async fn read_file(&self, path: &str) -> Result<FileBlob, GithubError> {
            if self.missing_file {
                return Err(GithubError::Api {
                    status: 404,
                    body: "Not Found".to_string(),
                });
            }
            let content = if self.empty_file {
                String::new()
            } else {
                "def handler(data):\n    value = data['user_id']\n    return value\n".to_string()
            };
            Ok(FileBlob {
                path: path.to_string(),
                content,
                sha: "abc123".to_string(),
            })
        }

        async fn create_branch(
            &self,
            _base_branch: &str,
            new_branch: &str,
        ) -> Result<(), GithubError> {
            self.branches.lock().unwrap().push(new_branch.to_string());
            Ok(())
        }

        async fn commit_file(
            &self,
            path: &str,
            _content: &str,
            _sha: &str,
            branch: &str,
            _message: &str,
        ) -> Result<(), GithubError> {
            if self.stale_first_commit.swap(false, Ordering::SeqCst) {
                return Err(GithubError::StaleSha(path.to_string()));
            }
            self.commits
                .lock()
                .unwrap()
                .push((branch.to_string(), path.to_string()));
            Ok(())
        }

        async fn open_pull_request(
            &self,
            _title: &str,
            _body: &str,
            head: &str,
            _base: &str,
        ) -> Result<String, GithubError> {
            let mut prs = self.prs.lock().unwrap();
            prs.push(head.to_string());
            Ok(format!("https://github.com/acme/storefront/pull/{}", prs.len()))
        }
    }

    struct FakeModel {
        reply: String,
    }

    #[async_trait]
    impl TextModel for FakeModel {
        async fn complete(&self, _prompt: &str) -> Result<String, GeminiError> {
            Ok(self.reply.clone())
        }
    }

    fn good_model() -> FakeModel {
        FakeModel {
            reply: GOOD_REPLY.to_string(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_opens_pr() {
        let host = FakeHost::default();
        let branches = Arc::clone(&host.branches);
        let commits = Arc::clone(&host.commits);
        let prs = Arc::clone(&host.prs);
        let sentry = FakeSentry::with_issues(vec![issue("42", "KeyError: 'user_id'")]);

        let agent = FixAgent::new(sentry, host, good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(
            summary,
            RunSummary {
                processed: 1,
                published: 1,
                skipped: 0,
                failed: 0,
            }
        );
        let branches = branches.lock().unwrap();
        assert_eq!(branches.len(), 1);
        assert!(branches[0].starts_with("fix/42-"));
        // The commit landed on the branch that was just created.
        let commits = commits.lock().unwrap();
        assert_eq!(commits[0].0, branches[0]);
        assert_eq!(commits[0].1, "app.py");
        assert_eq!(prs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_continues_after_stale_commit() {
        let host = FakeHost {
            stale_first_commit: AtomicBool::new(true),
            ..FakeHost::default()
        };
        let sentry = FakeSentry::with_issues(vec![
            issue("42", "KeyError: 'user_id'"),
            issue("43", "TypeError: NoneType"),
        ]);

        let agent = FixAgent::new(sentry, host, good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.published, 1);
    }

    #[tokio::test]
    async fn test_unlocalizable_event_is_skipped() {
        let host = FakeHost::default();
        let branches = Arc::clone(&host.branches);
        let mut sentry = FakeSentry::with_issues(vec![issue("42", "KeyError: 'user_id'")]);
        sentry.event = Event::default();

        let agent = FixAgent::new(sentry, host, good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.published, 0);
        assert!(branches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped() {
        let host = FakeHost {
            missing_file: true,
            ..FakeHost::default()
        };
        let branches = Arc::clone(&host.branches);
        let sentry = FakeSentry::with_issues(vec![issue("42", "KeyError: 'user_id'")]);

        let agent = FixAgent::new(sentry, host, good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(branches.lock().unwrap().is_empty());
    }

    // Blobs the contents API will not inline arrive as 2xx with empty
    // content.
    #[tokio::test]
    async fn test_empty_file_content_is_skipped() {
        let host = FakeHost {
            empty_file: true,
            ..FakeHost::default()
        };
        let branches = Arc::clone(&host.branches);
        let sentry = FakeSentry::with_issues(vec![issue("42", "KeyError: 'user_id'")]);

        let agent = FixAgent::new(sentry, host, good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.published, 0);
        assert!(branches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_skipped() {
        let host = FakeHost::default();
        let branches = Arc::clone(&host.branches);
        let sentry = FakeSentry::with_issues(vec![issue("42", "KeyError: 'user_id'")]);
        let model = FakeModel {
            reply: "I would be happy to help!".to_string(),
        };

        let agent = FixAgent::new(sentry, host, model);
        let summary = agent.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        // Skipped before anything touched the repository.
        assert!(branches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skip_reason_names_the_missing_marker() {
        let sentry = FakeSentry::with_issues(vec![issue("42", "KeyError: 'user_id'")]);
        let model = FakeModel {
            reply: "no markers here".to_string(),
        };

        let agent = FixAgent::new(sentry, FakeHost::default(), model);
        let outcome = agent.process_issue(&issue("42", "KeyError: 'user_id'")).await;

        match outcome {
            IssueOutcome::Skipped { reason } => {
                assert!(reason.contains("missing the EXPLANATION: marker"), "{reason}");
            }
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_fetch_error_fails_only_that_issue() {
        let host = FakeHost::default();
        let sentry = FakeSentry {
            issues: vec![
                issue("42", "KeyError: 'user_id'"),
                issue("43", "TypeError: NoneType"),
            ],
            event: crashing_event(),
            broken_event_ids: vec!["42".to_string()],
        };

        let agent = FixAgent::new(sentry, host, good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.published, 1);
    }

    #[tokio::test]
    async fn test_empty_issue_list_is_a_clean_run() {
        let sentry = FakeSentry::with_issues(Vec::new());

        let agent = FixAgent::new(sentry, FakeHost::default(), good_model());
        let summary = agent.run().await.unwrap();

        assert_eq!(summary, RunSummary::default());
    }
}
