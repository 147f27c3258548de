//! Trigger routing: decides which pipelines an incoming event starts.
//!
//! Two rules are evaluated independently:
//! - **publish**: a push of `refs/tags/<tag>` where `<tag>` matches the
//!   version-tag pattern. No other field of the event is consulted.
//! - **ci**: a push to any branch, or a pull request targeting the main
//!   branch, unless every changed path is on the ignore-list. Unknown or
//!   empty path lists never suppress CI.
//!
//! An event that matches neither rule is dropped silently.
//!
//! Both rules need a revision to build, so an event whose revision is empty
//! or starts with `-` is treated as malformed and matches neither rule, even
//! when its ref is a version tag.

use glob::{MatchOptions, Pattern};
use regex::Regex;
use tracing::debug;

use crate::domain::error::{Result, ShipgateError};
use crate::domain::event::RepoEvent;
use crate::domain::run::{PipelineKind, PipelineRun};

/// Default version-tag pattern (`vMAJOR.MINOR.PATCH`, ASCII digits only).
pub const DEFAULT_TAG_PATTERN: &str = r"^v[0-9]+\.[0-9]+\.[0-9]+$";

/// Default branch pull requests must target.
pub const DEFAULT_MAIN_BRANCH: &str = "main";

/// Paths whose changes alone never start CI.
pub const DEFAULT_IGNORE_PATHS: &[&str] = &["README*", ".gitignore", "LICENSE*"];

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled activation rules for both pipelines.
#[derive(Debug, Clone)]
pub struct TriggerRules {
    tag_pattern: Regex,
    main_branch: String,
    ignore: Vec<Pattern>,
}

impl Default for TriggerRules {
    fn default() -> Self {
        let ignore: Vec<String> = DEFAULT_IGNORE_PATHS.iter().map(|p| p.to_string()).collect();
        Self::new(DEFAULT_TAG_PATTERN, DEFAULT_MAIN_BRANCH, &ignore)
            .expect("default trigger rules are valid")
    }
}

impl TriggerRules {
    /// Compile trigger rules. Fails on an invalid regex or glob.
    pub fn new(tag_pattern: &str, main_branch: &str, ignore_paths: &[String]) -> Result<Self> {
        let tag_pattern = Regex::new(tag_pattern).map_err(|e| {
            ShipgateError::InvalidTriggerRule(format!("tag pattern '{tag_pattern}': {e}"))
        })?;
        let ignore = ignore_paths
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    ShipgateError::InvalidTriggerRule(format!("ignore path '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tag_pattern,
            main_branch: main_branch.to_string(),
            ignore,
        })
    }

    /// Whether `tag` is a release version tag.
    pub fn is_version_tag(&self, tag: &str) -> bool {
        self.tag_pattern.is_match(tag)
    }

    /// Publish rule: tag push with a version tag.
    pub fn matches_publish(&self, event: &RepoEvent) -> bool {
        event.tag().is_some_and(|tag| self.is_version_tag(tag))
    }

    /// CI rule: branch push or PR into main, not confined to ignored paths.
    pub fn matches_ci(&self, event: &RepoEvent) -> bool {
        let relevant_ref = event.pushed_branch().is_some()
            || event.target_branch() == Some(self.main_branch.as_str());
        relevant_ref && !self.only_ignored_paths(event.changed_paths.as_deref())
    }

    /// Whether `path` is on the ignore-list.
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./");
        self.ignore.iter().any(|p| p.matches_with(path, PATH_MATCH))
    }

    // Fail-open: an unknown or empty change set is never "only ignored".
    fn only_ignored_paths(&self, paths: Option<&[String]>) -> bool {
        match paths {
            Some(paths) if !paths.is_empty() => paths.iter().all(|p| self.is_ignored(p)),
            _ => false,
        }
    }
}

/// A pipeline run the listener decided to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRun {
    pub pipeline: PipelineKind,
    pub event: RepoEvent,
}

impl PlannedRun {
    /// Instantiate the run in `pending`.
    pub fn into_run(self) -> PipelineRun {
        PipelineRun::new(self.pipeline, self.event)
    }
}

/// Routes repository events to zero, one or two pipeline runs.
#[derive(Debug, Clone, Default)]
pub struct TriggerListener {
    rules: TriggerRules,
}

impl TriggerListener {
    pub fn new(rules: TriggerRules) -> Self {
        Self { rules }
    }

    /// Decide which pipelines `event` starts.
    pub fn route(&self, event: &RepoEvent) -> Vec<PlannedRun> {
        let revision = event.revision.trim();
        if revision.is_empty() || revision.starts_with('-') {
            debug!(ref_name = %event.ref_name, "Ignoring event without a usable revision");
            return Vec::new();
        }

        let mut planned = Vec::new();
        if self.rules.matches_publish(event) {
            planned.push(PlannedRun {
                pipeline: PipelineKind::Publish,
                event: event.clone(),
            });
        }
        if self.rules.matches_ci(event) {
            planned.push(PlannedRun {
                pipeline: PipelineKind::Ci,
                event: event.clone(),
            });
        }

        if planned.is_empty() {
            debug!(
                ref_name = %event.ref_name,
                revision = %event.short_revision(),
                "Event matched no pipeline"
            );
        }
        planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &[&str]) -> Option<Vec<String>> {
        Some(list.iter().map(|p| p.to_string()).collect())
    }

    #[test]
    fn test_version_tags() {
        let rules = TriggerRules::default();
        assert!(rules.is_version_tag("v1.2.3"));
        assert!(rules.is_version_tag("v0.0.1"));
        assert!(rules.is_version_tag("v10.20.300"));
        assert!(!rules.is_version_tag("version-1"));
        assert!(!rules.is_version_tag("v1.2"));
        assert!(!rules.is_version_tag("1.2.3"));
        assert!(!rules.is_version_tag("v1.2.3-rc.1"));
        assert!(!rules.is_version_tag("v1.2.3.4"));
        assert!(!rules.is_version_tag("v١.٢.٣"));
    }

    #[test]
    fn test_ignore_list_matches_root_files() {
        let rules = TriggerRules::default();
        assert!(rules.is_ignored("README.md"));
        assert!(rules.is_ignored("README"));
        assert!(rules.is_ignored(".gitignore"));
        assert!(rules.is_ignored("LICENSE"));
        assert!(rules.is_ignored("./LICENSE-MIT"));
        assert!(!rules.is_ignored("src/lib.rs"));
        assert!(!rules.is_ignored("docs/README.md"));
        assert!(!rules.is_ignored("README/notes.rs"));
    }

    #[test]
    fn test_ci_skips_ignored_only_changes() {
        let rules = TriggerRules::default();
        let event = RepoEvent::branch_push("main", "abc", paths(&["README.md"]));
        assert!(!rules.matches_ci(&event));

        let event = RepoEvent::branch_push("main", "abc", paths(&["README.md", "src/lib.rs"]));
        assert!(rules.matches_ci(&event));
    }

    #[test]
    fn test_ci_fails_open_without_paths() {
        let rules = TriggerRules::default();
        assert!(rules.matches_ci(&RepoEvent::branch_push("main", "abc", None)));
        assert!(rules.matches_ci(&RepoEvent::branch_push("main", "abc", paths(&[]))));
    }

    #[test]
    fn test_ci_pull_request_must_target_main() {
        let rules = TriggerRules::default();
        let into_main = RepoEvent::pull_request("feature", "main", "abc", paths(&["src/a.rs"]));
        let into_dev = RepoEvent::pull_request("feature", "develop", "abc", paths(&["src/a.rs"]));
        assert!(rules.matches_ci(&into_main));
        assert!(!rules.matches_ci(&into_dev));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(TriggerRules::new("(", "main", &[]).is_err());
        assert!(TriggerRules::new(DEFAULT_TAG_PATTERN, "main", &["[".to_string()]).is_err());
    }

    #[test]
    fn test_route_tag_push_plans_publish_only() {
        let listener = TriggerListener::default();
        let planned = listener.route(&RepoEvent::tag_push("v1.2.3", "abc"));
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].pipeline, PipelineKind::Publish);
    }

    #[test]
    fn test_route_drops_event_without_revision() {
        let listener = TriggerListener::default();
        assert!(listener.route(&RepoEvent::tag_push("v1.2.3", " ")).is_empty());
    }

    #[test]
    fn test_route_drops_option_like_revision() {
        let listener = TriggerListener::default();
        assert!(listener
            .route(&RepoEvent::tag_push("v1.2.3", "--orphan=evil"))
            .is_empty());
        assert!(listener
            .route(&RepoEvent::branch_push("main", "-b", paths(&["src/lib.rs"])))
            .is_empty());
    }

    #[test]
    fn test_planned_run_starts_pending() {
        let planned = PlannedRun {
            pipeline: PipelineKind::Ci,
            event: RepoEvent::branch_push("main", "abc", None),
        };
        let run = planned.into_run();
        assert_eq!(run.pipeline, PipelineKind::Ci);
        assert_eq!(run.state, crate::domain::RunState::Pending);
    }
}
