//! The Git + hosted-forge collaborator interface: push, PR creation,
//! comments, thread resolution, and PR-feedback polling. The real adapter
//! (shelling out to `git`/`gh` or an HTTP client against a forge API) is
//! outside this crate's scope; only the interface the scheduler handlers
//! (C4) and work orchestrator (C6) consume lives here.

use async_trait::async_trait;

/// One piece of feedback observed on an open PR (a review comment, a CI
/// failure) as reported by the forge.
#[derive(Debug, Clone)]
pub struct ForgeFeedbackItem {
    pub source_id: String,
    pub feedback_type: String,
    pub title: String,
    pub description: String,
    pub source_url: Option<String>,
}

/// Collaborator interface for the Git/forge adapter.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Push `branch_name` from `worktree_path` to the remote.
    async fn push_branch(&self, worktree_path: &str, branch_name: &str) -> anyhow::Result<()>;

    /// Open a pull request for `branch_name` against `base_branch`,
    /// returning its URL.
    async fn create_pr(
        &self,
        branch_name: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<String>;

    /// Post a comment on the PR at `pr_url`.
    async fn add_comment(&self, pr_url: &str, body: &str) -> anyhow::Result<()>;

    /// Mark a review thread resolved.
    async fn resolve_thread(&self, pr_url: &str, thread_id: &str) -> anyhow::Result<()>;

    /// Fetch new feedback items on the PR at `pr_url` since the last poll.
    async fn poll_feedback(&self, pr_url: &str) -> anyhow::Result<Vec<ForgeFeedbackItem>>;
}

/// An in-memory forge double for tests: every mutating call is recorded,
/// `poll_feedback` returns whatever was queued via [`InMemoryForge::queue_feedback`].
#[derive(Debug, Default)]
pub struct InMemoryForge {
    pub pushed_branches: std::sync::Mutex<Vec<(String, String)>>,
    pub created_prs: std::sync::Mutex<Vec<(String, String)>>,
    pub comments: std::sync::Mutex<Vec<(String, String)>>,
    pub resolved_threads: std::sync::Mutex<Vec<(String, String)>>,
    queued_feedback: std::sync::Mutex<Vec<ForgeFeedbackItem>>,
    next_pr_url: std::sync::Mutex<Option<String>>,
}

impl InMemoryForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_feedback(&self, item: ForgeFeedbackItem) {
        self.queued_feedback.lock().unwrap().push(item);
    }

    pub fn set_next_pr_url(&self, url: impl Into<String>) {
        *self.next_pr_url.lock().unwrap() = Some(url.into());
    }
}

#[async_trait]
impl Forge for InMemoryForge {
    async fn push_branch(&self, worktree_path: &str, branch_name: &str) -> anyhow::Result<()> {
        self.pushed_branches
            .lock()
            .unwrap()
            .push((worktree_path.to_string(), branch_name.to_string()));
        Ok(())
    }

    async fn create_pr(
        &self,
        branch_name: &str,
        base_branch: &str,
        _title: &str,
        _body: &str,
    ) -> anyhow::Result<String> {
        self.created_prs
            .lock()
            .unwrap()
            .push((branch_name.to_string(), base_branch.to_string()));
        Ok(self
            .next_pr_url
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("https://example.invalid/pr/{branch_name}")))
    }

    async fn add_comment(&self, pr_url: &str, body: &str) -> anyhow::Result<()> {
        self.comments
            .lock()
            .unwrap()
            .push((pr_url.to_string(), body.to_string()));
        Ok(())
    }

    async fn resolve_thread(&self, pr_url: &str, thread_id: &str) -> anyhow::Result<()> {
        self.resolved_threads
            .lock()
            .unwrap()
            .push((pr_url.to_string(), thread_id.to_string()));
        Ok(())
    }

    async fn poll_feedback(&self, _pr_url: &str) -> anyhow::Result<Vec<ForgeFeedbackItem>> {
        Ok(std::mem::take(&mut *self.queued_feedback.lock().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pr_records_and_returns_url() {
        let forge = InMemoryForge::new();
        let url = forge
            .create_pr("co/work-1", "main", "title", "body")
            .await
            .unwrap();
        assert!(url.contains("co/work-1"));
        assert_eq!(forge.created_prs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poll_feedback_drains_the_queue() {
        let forge = InMemoryForge::new();
        forge.queue_feedback(ForgeFeedbackItem {
            source_id: "c1".to_string(),
            feedback_type: "comment".to_string(),
            title: "nit".to_string(),
            description: "please rename".to_string(),
            source_url: None,
        });

        let first = forge.poll_feedback("https://example.invalid/pr/1").await.unwrap();
        assert_eq!(first.len(), 1);

        let second = forge.poll_feedback("https://example.invalid/pr/1").await.unwrap();
        assert!(second.is_empty());
    }
}
