use shipgate_core::{PipelineKind, RepoEvent, TriggerListener, TriggerRules};

fn changed(paths: &[&str]) -> Option<Vec<String>> {
    Some(paths.iter().map(|p| p.to_string()).collect())
}

fn kinds(listener: &TriggerListener, event: &RepoEvent) -> Vec<PipelineKind> {
    listener.route(event).into_iter().map(|p| p.pipeline).collect()
}

// ---- publish rule ----

#[test]
fn version_tag_push_triggers_publish_exactly_once() {
    let listener = TriggerListener::default();
    for tag in ["v1.2.3", "v0.1.0", "v2.10.7", "v100.0.0"] {
        let planned = kinds(&listener, &RepoEvent::tag_push(tag, "9fceb02"));
        assert_eq!(planned, vec![PipelineKind::Publish], "tag {tag}");
    }
}

#[test]
fn non_version_tags_never_trigger_publish() {
    let listener = TriggerListener::default();
    for tag in ["version-1", "v1.2", "1.2.3", "v1.2.3-beta", "release", "v1..3", "vx.y.z"] {
        let planned = kinds(&listener, &RepoEvent::tag_push(tag, "9fceb02"));
        assert!(planned.is_empty(), "tag {tag} should not trigger anything");
    }
}

#[test]
fn publish_rule_ignores_changed_paths() {
    let listener = TriggerListener::default();
    let mut event = RepoEvent::tag_push("v1.2.3", "9fceb02");
    event.changed_paths = changed(&["README.md"]);
    assert_eq!(kinds(&listener, &event), vec![PipelineKind::Publish]);
}

#[test]
fn tag_pull_request_is_not_a_tag_push() {
    let listener = TriggerListener::default();
    let event = RepoEvent::pull_request("refs/tags/v1.2.3", "develop", "9fceb02", None);
    assert!(listener.route(&event).is_empty());
}

// ---- ci rule ----

#[test]
fn readme_only_push_does_not_run_ci() {
    let listener = TriggerListener::default();
    let event = RepoEvent::branch_push("main", "9fceb02", changed(&["README.md"]));
    assert!(listener.route(&event).is_empty());
}

#[test]
fn readme_plus_source_push_runs_ci() {
    let listener = TriggerListener::default();
    let event = RepoEvent::branch_push("main", "9fceb02", changed(&["README.md", "src/lib.rs"]));
    assert_eq!(kinds(&listener, &event), vec![PipelineKind::Ci]);
}

#[test]
fn ignore_list_only_changes_are_skipped() {
    let listener = TriggerListener::default();
    let event = RepoEvent::branch_push(
        "feature/docs",
        "9fceb02",
        changed(&["README.md", ".gitignore", "LICENSE"]),
    );
    assert!(listener.route(&event).is_empty());
}

#[test]
fn unknown_paths_fail_open() {
    let listener = TriggerListener::default();
    let event = RepoEvent::branch_push("main", "9fceb02", None);
    assert_eq!(kinds(&listener, &event), vec![PipelineKind::Ci]);
}

#[test]
fn pull_request_into_main_runs_ci() {
    let listener = TriggerListener::default();
    let event = RepoEvent::pull_request("feature", "main", "9fceb02", changed(&["src/main.rs"]));
    assert_eq!(kinds(&listener, &event), vec![PipelineKind::Ci]);
}

#[test]
fn custom_rules_are_honoured() {
    let rules = TriggerRules::new(
        r"^release-[0-9]+$",
        "trunk",
        &["docs/**".to_string()],
    )
    .unwrap();
    let listener = TriggerListener::new(rules);

    assert_eq!(
        kinds(&listener, &RepoEvent::tag_push("release-7", "abc")),
        vec![PipelineKind::Publish]
    );
    assert!(kinds(&listener, &RepoEvent::tag_push("v1.2.3", "abc")).is_empty());

    let docs_only = RepoEvent::pull_request("x", "trunk", "abc", changed(&["docs/guide/intro.md"]));
    assert!(listener.route(&docs_only).is_empty());

    let readme = RepoEvent::pull_request("x", "trunk", "abc", changed(&["README.md"]));
    assert_eq!(kinds(&listener, &readme), vec![PipelineKind::Ci]);
}

#[test]
fn malformed_event_json_never_reaches_the_listener() {
    let bad = r#"{"event_type": "deploy", "ref": "refs/tags/v1.2.3", "revision": "abc"}"#;
    assert!(serde_json::from_str::<RepoEvent>(bad).is_err());
}
