//! Repository events delivered by the source-control host.

use serde::{Deserialize, Serialize};

/// Prefix of fully-qualified tag refs.
pub const TAG_REF_PREFIX: &str = "refs/tags/";

/// Prefix of fully-qualified branch refs.
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Class of repository event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    PullRequest,
}

/// A repository event as delivered by the source-control host.
///
/// ```json
/// { "event_type": "push", "ref": "refs/tags/v1.2.3", "revision": "9fceb02..." }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoEvent {
    /// Push or pull request.
    pub event_type: EventType,

    /// Ref that was pushed (`refs/tags/v1.2.3`, `refs/heads/main`), or the
    /// head branch of a pull request.
    #[serde(rename = "ref", alias = "ref_name")]
    pub ref_name: String,

    /// Target branch of a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,

    /// Paths touched by the event. `None` when the host did not report them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_paths: Option<Vec<String>>,

    /// Commit the event points at.
    pub revision: String,
}

impl RepoEvent {
    /// A push of `refs/tags/<tag>`.
    pub fn tag_push(tag: &str, revision: &str) -> Self {
        Self {
            event_type: EventType::Push,
            ref_name: format!("{TAG_REF_PREFIX}{tag}"),
            base_ref: None,
            changed_paths: None,
            revision: revision.to_string(),
        }
    }

    /// A push of `refs/heads/<branch>`.
    pub fn branch_push(branch: &str, revision: &str, changed_paths: Option<Vec<String>>) -> Self {
        Self {
            event_type: EventType::Push,
            ref_name: format!("{BRANCH_REF_PREFIX}{branch}"),
            base_ref: None,
            changed_paths,
            revision: revision.to_string(),
        }
    }

    /// A pull request from `head` into `base`.
    pub fn pull_request(
        head: &str,
        base: &str,
        revision: &str,
        changed_paths: Option<Vec<String>>,
    ) -> Self {
        Self {
            event_type: EventType::PullRequest,
            ref_name: head.to_string(),
            base_ref: Some(base.to_string()),
            changed_paths,
            revision: revision.to_string(),
        }
    }

    /// Tag name when this event is a tag push.
    pub fn tag(&self) -> Option<&str> {
        if self.event_type != EventType::Push {
            return None;
        }
        self.ref_name
            .strip_prefix(TAG_REF_PREFIX)
            .filter(|t| !t.is_empty())
    }

    /// Branch name when this event is a branch push.
    pub fn pushed_branch(&self) -> Option<&str> {
        if self.event_type != EventType::Push {
            return None;
        }
        self.ref_name
            .strip_prefix(BRANCH_REF_PREFIX)
            .filter(|b| !b.is_empty())
    }

    /// Target branch when this event is a pull request.
    pub fn target_branch(&self) -> Option<&str> {
        if self.event_type != EventType::PullRequest {
            return None;
        }
        self.base_ref
            .as_deref()
            .map(|b| b.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(b))
    }

    /// First 12 characters of the revision, for log lines.
    pub fn short_revision(&self) -> &str {
        self.revision.get(..12).unwrap_or(&self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_push_exposes_tag() {
        let event = RepoEvent::tag_push("v1.2.3", "abc123");
        assert_eq!(event.tag(), Some("v1.2.3"));
        assert_eq!(event.pushed_branch(), None);
        assert_eq!(event.target_branch(), None);
    }

    #[test]
    fn test_branch_push_exposes_branch() {
        let event = RepoEvent::branch_push("feature/x", "abc123", None);
        assert_eq!(event.pushed_branch(), Some("feature/x"));
        assert_eq!(event.tag(), None);
    }

    #[test]
    fn test_pull_request_target_is_normalised() {
        let event = RepoEvent::pull_request("feature", "refs/heads/main", "abc123", None);
        assert_eq!(event.target_branch(), Some("main"));
        assert_eq!(event.tag(), None);
    }

    #[test]
    fn test_empty_tag_is_not_a_tag() {
        let mut event = RepoEvent::tag_push("", "abc123");
        assert_eq!(event.tag(), None);
        event.ref_name = "v1.2.3".to_string();
        assert_eq!(event.tag(), None);
    }

    #[test]
    fn test_deserialize_from_host_payload() {
        let json = r#"{
            "event_type": "pull_request",
            "ref": "feature",
            "base_ref": "main",
            "changed_paths": ["src/lib.rs"],
            "revision": "0123456789abcdef"
        }"#;
        let event: RepoEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::PullRequest);
        assert_eq!(event.target_branch(), Some("main"));
        assert_eq!(event.changed_paths.as_deref(), Some(&["src/lib.rs".to_string()][..]));
        assert_eq!(event.short_revision(), "0123456789ab");
    }

    #[test]
    fn test_missing_changed_paths_is_none() {
        let json = r#"{"event_type": "push", "ref": "refs/heads/main", "revision": "abc"}"#;
        let event: RepoEvent = serde_json::from_str(json).unwrap();
        assert!(event.changed_paths.is_none());
        assert_eq!(event.short_revision(), "abc");
    }
}
