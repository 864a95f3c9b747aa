#![forbid(unsafe_code)]

use fl_storage::{
    AdvanceBranchRequest, ChangeQuery, CommitChangeSetRequest, CreateBranchRequest, NewChange,
    SqliteStore, StoreError,
};
use serde_json::json;

fn open_store(label: &str) -> SqliteStore {
    let dir = std::env::temp_dir().join(format!(
        "fl_storage_{}_{}_{}",
        label,
        std::process::id(),
        now_ms()
    ));
    SqliteStore::open(dir).expect("open store")
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn new_change(entity_id: &str, content: Option<serde_json::Value>) -> NewChange {
    NewChange {
        entity_id: entity_id.to_string(),
        file_id: "db.sqlite".to_string(),
        schema_key: "bundle".to_string(),
        content,
        declared_parent: None,
    }
}

fn commit_one(
    store: &mut SqliteStore,
    branch: &str,
    entity_id: &str,
    content: Option<serde_json::Value>,
) -> fl_storage::CommittedChangeSet {
    let expected_head = store.branch_head(branch).expect("branch head");
    store
        .commit_change_set(CommitChangeSetRequest {
            branch: branch.to_string(),
            expected_head,
            changes: vec![new_change(entity_id, content)],
        })
        .expect("commit")
}

#[test]
fn snapshot_put_is_idempotent() {
    let mut store = open_store("snapshot_idempotent");
    let content = json!({"id": "1", "locale": "en"});

    let first = store.snapshot_put(Some(&content)).expect("put");
    let second = store.snapshot_put(Some(&content)).expect("put again");
    assert_eq!(first, second);

    let stored = store.snapshot_get(&first).expect("get");
    assert_eq!(stored, Some(content));
}

#[test]
fn snapshot_get_unknown_id_fails() {
    let store = open_store("snapshot_unknown");
    let err = store.snapshot_get(&"0".repeat(64)).unwrap_err();
    assert!(matches!(err, StoreError::UnknownSnapshot));
}

#[test]
fn deletion_marker_resolves_to_none() {
    let mut store = open_store("snapshot_deletion");
    let id = store.snapshot_put(None).expect("put deletion");
    assert_eq!(store.snapshot_get(&id).expect("get"), None);
}

#[test]
fn commit_advances_head_and_links_parents() {
    let mut store = open_store("commit_linkage");

    let first = commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    let second = commit_one(
        &mut store,
        "main",
        "bundle|1",
        Some(json!({"id": "1", "alias": "greeting"})),
    );

    let head = store
        .entity_head("bundle|1", "main")
        .expect("entity head")
        .expect("entity exists");
    assert_eq!(head.id, second.changes[0].id);

    let ancestors = store.ancestors_of(&head.id).expect("ancestors");
    assert_eq!(ancestors.len(), 1);
    assert_eq!(ancestors[0].id, first.changes[0].id);

    // No change reachable from the head is its own ancestor.
    for ancestor in &ancestors {
        assert_ne!(ancestor.id, head.id);
    }

    let branch_head = store.branch_head("main").expect("branch head");
    assert_eq!(branch_head, Some(second.change_set.id.clone()));
    assert_eq!(second.change_set.parent_id, Some(first.change_set.id));
}

#[test]
fn stale_expected_head_fails_without_committing() {
    let mut store = open_store("stale_commit");

    commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));

    // A caller that read the head before the first commit is now stale.
    let err = store
        .commit_change_set(CommitChangeSetRequest {
            branch: "main".to_string(),
            expected_head: None,
            changes: vec![new_change("bundle|2", Some(json!({"id": "2"})))],
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::StaleBranch { .. }));

    // Nothing from the failed commit is visible.
    assert!(
        store
            .entity_head("bundle|2", "main")
            .expect("entity head")
            .is_none()
    );
}

#[test]
fn advance_branch_requires_matching_parent() {
    let mut store = open_store("advance_stale");

    let first = commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));

    // Re-advancing to a changeset whose parent is no longer the head loses
    // the race.
    let err = store
        .advance_branch(AdvanceBranchRequest {
            branch: "main".to_string(),
            change_set_id: first.change_set.id.clone(),
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::StaleBranch { .. }));
}

#[test]
fn advance_branch_fast_forwards_a_fork() {
    let mut store = open_store("advance_ok");

    let first = commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));

    // A branch created before the commit can fast-forward onto it.
    store
        .create_branch(CreateBranchRequest {
            name: "mirror".to_string(),
            from: None,
        })
        .expect("create branch");
    let branch = store
        .advance_branch(AdvanceBranchRequest {
            branch: "mirror".to_string(),
            change_set_id: first.change_set.id.clone(),
        })
        .expect("advance");
    assert_eq!(branch.head_change_set_id, Some(first.change_set.id));
}

#[test]
fn branches_share_history_and_diverge() {
    let mut store = open_store("branch_divergence");

    commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    store
        .create_branch(CreateBranchRequest {
            name: "feature/x".to_string(),
            from: Some("main".to_string()),
        })
        .expect("create branch");

    // The fork sees the shared history without copying it.
    let forked = store
        .entity_head("bundle|1", "feature/x")
        .expect("entity head")
        .expect("inherited");
    assert_eq!(forked.snapshot_id.len(), 64);

    // A commit on the fork does not move main's view.
    commit_one(
        &mut store,
        "feature/x",
        "bundle|1",
        Some(json!({"id": "1", "alias": "forked"})),
    );
    let main_state = store.entity_state("bundle|1", "main").expect("state");
    assert_eq!(main_state, Some(json!({"id": "1"})));
    let fork_state = store.entity_state("bundle|1", "feature/x").expect("state");
    assert_eq!(fork_state, Some(json!({"id": "1", "alias": "forked"})));
}

#[test]
fn unscoped_head_is_ambiguous_after_divergence() {
    let mut store = open_store("ambiguous_head");

    commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    store
        .create_branch(CreateBranchRequest {
            name: "other".to_string(),
            from: Some("main".to_string()),
        })
        .expect("create branch");

    commit_one(
        &mut store,
        "main",
        "bundle|1",
        Some(json!({"id": "1", "alias": "a"})),
    );
    commit_one(
        &mut store,
        "other",
        "bundle|1",
        Some(json!({"id": "1", "alias": "b"})),
    );

    let err = store.unscoped_head("bundle|1").unwrap_err();
    match err {
        StoreError::AmbiguousHead {
            entity_id,
            candidates,
        } => {
            assert_eq!(entity_id, "bundle|1");
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected AmbiguousHead, got {other}"),
    }

    // Branch scoping disambiguates.
    let main_head = store
        .entity_head("bundle|1", "main")
        .expect("entity head")
        .expect("exists");
    assert_eq!(
        store.entity_state("bundle|1", "main").expect("state"),
        Some(json!({"id": "1", "alias": "a"}))
    );
    assert_eq!(main_head.entity_id, "bundle|1");
}

#[test]
fn declared_parent_must_be_entity_head() {
    let mut store = open_store("parent_not_head");

    let first = commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    commit_one(
        &mut store,
        "main",
        "bundle|1",
        Some(json!({"id": "1", "alias": "x"})),
    );

    let expected_head = store.branch_head("main").expect("branch head");
    let err = store
        .commit_change_set(CommitChangeSetRequest {
            branch: "main".to_string(),
            expected_head,
            changes: vec![NewChange {
                entity_id: "bundle|1".to_string(),
                file_id: "db.sqlite".to_string(),
                schema_key: "bundle".to_string(),
                content: Some(json!({"id": "1", "alias": "y"})),
                declared_parent: Some(first.changes[0].id.clone()),
            }],
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::ParentNotHead { .. }));
}

#[test]
fn deletion_marker_hides_entity_state() {
    let mut store = open_store("deletion_state");

    commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    commit_one(&mut store, "main", "bundle|1", None);

    // The raw head is the deletion change; the resolved state is gone.
    let head = store
        .entity_head("bundle|1", "main")
        .expect("entity head")
        .expect("deletion change");
    assert_eq!(head.snapshot_id, "no-content");
    assert_eq!(store.entity_state("bundle|1", "main").expect("state"), None);
}

#[test]
fn labels_gate_queries_and_ancestor_lookup() {
    let mut store = open_store("labels");

    let first = commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    let second = commit_one(
        &mut store,
        "main",
        "bundle|1",
        Some(json!({"id": "1", "alias": "x"})),
    );
    let third = commit_one(
        &mut store,
        "main",
        "bundle|1",
        Some(json!({"id": "1", "alias": "y"})),
    );

    store
        .attach_change_label("confirmed", &first.changes[0].id)
        .expect("label first");
    assert!(
        store
            .change_has_label(&first.changes[0].id, "confirmed")
            .expect("has label")
    );
    assert!(
        !store
            .change_has_label(&second.changes[0].id, "confirmed")
            .expect("has label")
    );

    let err = store
        .attach_change_label("does-not-exist", &first.changes[0].id)
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownLabel));

    // Nearest confirmed ancestor of the newest change skips the unlabeled
    // middle change.
    let nearest = store
        .nearest_labeled_ancestor(&third.changes[0].id, "confirmed")
        .expect("walk")
        .expect("found");
    assert_eq!(nearest.id, first.changes[0].id);

    let confirmed = store
        .list_changes(&ChangeQuery {
            label: Some("confirmed".to_string()),
            ..ChangeQuery::default()
        })
        .expect("query");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].id, first.changes[0].id);

    store
        .attach_change_set_label("confirmed", &third.change_set.id)
        .expect("label changeset");
    assert!(
        store
            .change_set_has_label(&third.change_set.id, "confirmed")
            .expect("has label")
    );
}

#[test]
fn change_query_scopes_by_branch() {
    let mut store = open_store("query_branch_scope");

    commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    store
        .create_branch(CreateBranchRequest {
            name: "fork".to_string(),
            from: Some("main".to_string()),
        })
        .expect("create branch");
    let fork_commit = commit_one(
        &mut store,
        "fork",
        "bundle|2",
        Some(json!({"id": "2"})),
    );

    let on_main = store
        .list_changes(&ChangeQuery {
            branch: Some("main".to_string()),
            ..ChangeQuery::default()
        })
        .expect("query main");
    assert_eq!(on_main.len(), 1);
    assert_eq!(on_main[0].entity_id, "bundle|1");

    let on_fork = store
        .list_changes(&ChangeQuery {
            branch: Some("fork".to_string()),
            ..ChangeQuery::default()
        })
        .expect("query fork");
    assert_eq!(on_fork.len(), 2);
    assert!(on_fork.iter().any(|c| c.id == fork_commit.changes[0].id));

    let scoped = store
        .list_changes(&ChangeQuery {
            branch: Some("fork".to_string()),
            entity_id: Some("bundle|2".to_string()),
            ..ChangeQuery::default()
        })
        .expect("query scoped");
    assert_eq!(scoped.len(), 1);
}

#[test]
fn duplicate_branch_name_is_rejected() {
    let mut store = open_store("duplicate_branch");
    store
        .create_branch(CreateBranchRequest {
            name: "twice".to_string(),
            from: None,
        })
        .expect("create");
    let err = store
        .create_branch(CreateBranchRequest {
            name: "twice".to_string(),
            from: None,
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::BranchAlreadyExists));
}

#[test]
fn delete_branch_keeps_history() {
    let mut store = open_store("delete_branch");

    commit_one(&mut store, "main", "bundle|1", Some(json!({"id": "1"})));
    store
        .create_branch(CreateBranchRequest {
            name: "doomed".to_string(),
            from: Some("main".to_string()),
        })
        .expect("create");
    store.delete_branch("doomed").expect("delete");

    let err = store.branch_head("doomed").unwrap_err();
    assert!(matches!(err, StoreError::UnknownBranch));

    // History referenced by the deleted pointer survives.
    assert!(
        store
            .entity_head("bundle|1", "main")
            .expect("entity head")
            .is_some()
    );
}

#[test]
fn duplicate_entity_in_one_changeset_is_rejected() {
    let mut store = open_store("duplicate_entity");
    let err = store
        .commit_change_set(CommitChangeSetRequest {
            branch: "main".to_string(),
            expected_head: None,
            changes: vec![
                new_change("bundle|1", Some(json!({"id": "1"}))),
                new_change("bundle|1", Some(json!({"id": "1", "alias": "x"}))),
            ],
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[test]
fn tracked_file_blob_roundtrip_and_undiffed_detection() {
    let mut store = open_store("files");

    store
        .track_file("db.sqlite", "/db.sqlite", "table_rows")
        .expect("track");
    assert!(store.undiffed_files().expect("undiffed").is_empty());

    store.write_file_blob("db.sqlite", b"v1").expect("write");
    let undiffed = store.undiffed_files().expect("undiffed");
    assert_eq!(undiffed.len(), 1);
    assert_eq!(undiffed[0].id, "db.sqlite");

    store.mark_diffed("db.sqlite", Some(b"v1")).expect("mark");
    assert!(store.undiffed_files().expect("undiffed").is_empty());

    let file = store.file_get("db.sqlite").expect("get");
    assert_eq!(file.data.as_deref(), Some(b"v1".as_slice()));
    assert_eq!(file.diffed_data.as_deref(), Some(b"v1".as_slice()));

    let err = store.write_file_blob("nope", b"x").unwrap_err();
    assert!(matches!(err, StoreError::UnknownFile));
}
