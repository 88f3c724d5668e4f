use taskdeck_core::db::open_db_in_memory;
use taskdeck_core::{run_query, ItemDraft, ItemService, NotificationBus, QueryRequest};

fn service() -> ItemService {
    let conn = open_db_in_memory().unwrap();
    ItemService::new(conn, NotificationBus::new())
}

fn draft(subject: &str, tags: &[&str]) -> ItemDraft {
    ItemDraft {
        subject: subject.to_string(),
        description: format!("{subject} description"),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        ..ItemDraft::default()
    }
}

#[test]
fn no_filters_short_circuits_to_whole_set() {
    let mut service = service();
    service.add_item(&draft("one", &[])).unwrap();
    service.add_item(&draft("two", &[])).unwrap();
    let deleted = service.add_item(&draft("three", &[])).unwrap();
    service.delete_item(deleted.uuid).unwrap();

    let live = run_query(service.connection(), &QueryRequest::default()).unwrap();
    assert_eq!(live.len(), 2);

    let binned = run_query(
        service.connection(),
        &QueryRequest {
            from_bin: true,
            ..QueryRequest::default()
        },
    )
    .unwrap();
    assert_eq!(binned.len(), 1);
    assert!(binned[0].deleted);
}

#[test]
fn scenario_subject_prefix_and_exact_tag_search() {
    let mut service = service();
    service.add_item(&draft("buy milk", &[])).unwrap();
    let bread = service.add_item(&draft("buy bread", &["shopping"])).unwrap();

    // Non-exact subject search returns both "buy" items.
    let by_subject = run_query(
        service.connection(),
        &QueryRequest {
            subject_prefix: Some("buy".to_string()),
            ..QueryRequest::default()
        },
    )
    .unwrap();
    assert_eq!(by_subject.len(), 2);

    // Exact tag search returns only the tagged item.
    let by_tag = run_query(
        service.connection(),
        &QueryRequest {
            tag_tokens: vec!["shopping".to_string()],
            exact: true,
            ..QueryRequest::default()
        },
    )
    .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].uuid, bread.uuid);
}

#[test]
fn include_filter_returns_only_tagged_items() {
    let mut service = service();
    service.add_item(&draft("alpha", &["x", "y"])).unwrap();
    service.add_item(&draft("beta", &["x"])).unwrap();
    service.add_item(&draft("gamma", &["z"])).unwrap();

    let request = QueryRequest {
        tag_tokens: vec!["+x".to_string()],
        exact: true,
        ..QueryRequest::default()
    };
    let result = run_query(service.connection(), &request).unwrap();
    assert_eq!(result.len(), 2);
    assert!(result
        .iter()
        .all(|item| item.tags.iter().any(|tag| tag.name == "x")));
}

#[test]
fn exclude_filter_removes_tagged_items() {
    let mut service = service();
    service.add_item(&draft("keep me", &["inbox"])).unwrap();
    service
        .add_item(&draft("drop me", &["inbox", "archived"]))
        .unwrap();

    let request = QueryRequest {
        tag_tokens: vec!["inbox".to_string(), "-archived".to_string()],
        exact: true,
        ..QueryRequest::default()
    };
    let result = run_query(service.connection(), &request).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].subject, "keep me");
    assert!(result
        .iter()
        .all(|item| item.tags.iter().all(|tag| tag.name != "archived")));
}

#[test]
fn exact_mode_revalidates_against_stale_index() {
    let mut service = service();
    let untagged = service.add_item(&draft("untagged", &[])).unwrap();
    service.add_item(&draft("tagged", &["real"])).unwrap();

    // Simulate inverted-index staleness: the index claims the untagged item
    // carries the tag.
    service
        .connection()
        .execute(
            "UPDATE tag_index SET item_ids = json_insert(item_ids, '$[#]', ?1) WHERE name = 'real';",
            [untagged.id],
        )
        .unwrap();

    let non_exact = run_query(
        service.connection(),
        &QueryRequest {
            tag_tokens: vec!["real".to_string()],
            ..QueryRequest::default()
        },
    )
    .unwrap();
    // Non-exact trusts the index as-is, stale membership included.
    assert_eq!(non_exact.len(), 2);

    let exact = run_query(
        service.connection(),
        &QueryRequest {
            tag_tokens: vec!["real".to_string()],
            exact: true,
            ..QueryRequest::default()
        },
    )
    .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].subject, "tagged");
}

#[test]
fn rebuild_recovers_index_from_staleness() {
    let mut service = service();
    let untagged = service.add_item(&draft("clean", &[])).unwrap();
    service.add_item(&draft("marked", &["real"])).unwrap();

    service
        .connection()
        .execute(
            "UPDATE tag_index SET item_ids = json_insert(item_ids, '$[#]', ?1) WHERE name = 'real';",
            [untagged.id],
        )
        .unwrap();

    service.rebuild_tag_index().unwrap();

    let non_exact = run_query(
        service.connection(),
        &QueryRequest {
            tag_tokens: vec!["real".to_string()],
            ..QueryRequest::default()
        },
    )
    .unwrap();
    assert_eq!(non_exact.len(), 1);
    assert_eq!(non_exact[0].subject, "marked");
}

#[test]
fn free_text_matches_any_serialized_content() {
    let mut service = service();
    let mut input = draft("opaque subject", &[]);
    input.description = "contains the word zephyr somewhere".to_string();
    service.add_item(&input).unwrap();
    service.add_item(&draft("unrelated", &[])).unwrap();

    let result = run_query(
        service.connection(),
        &QueryRequest {
            terms: vec!["ZEPHYR".to_string()],
            ..QueryRequest::default()
        },
    )
    .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].subject, "opaque subject");
}

#[test]
fn non_exact_mode_unions_dimensions() {
    let mut service = service();
    service.add_item(&draft("alpha report", &[])).unwrap();
    service.add_item(&draft("beta notes", &["work"])).unwrap();

    let request = QueryRequest {
        subject_prefix: Some("alpha".to_string()),
        tag_tokens: vec!["work".to_string()],
        ..QueryRequest::default()
    };
    let result = run_query(service.connection(), &request).unwrap();
    assert_eq!(result.len(), 2);
}

/// Documents the exact-mode combination quirk: dimension lists are
/// intersected positionally after id-sorting, not as id sets. An item
/// present in every dimension can still be dropped when list lengths
/// differ.
#[test]
fn exact_mode_intersection_is_positional_not_set_based() {
    let mut service = service();
    // Lower id, matches subject dimension only.
    service.add_item(&draft("quirk alpha", &[])).unwrap();
    // Higher id, matches both dimensions.
    let both = service.add_item(&draft("quirk beta", &["odd"])).unwrap();

    let request = QueryRequest {
        subject_prefix: Some("quirk".to_string()),
        tag_tokens: vec!["+odd".to_string()],
        exact: true,
        ..QueryRequest::default()
    };
    let result = run_query(service.connection(), &request).unwrap();

    // Set semantics would return `both`; positional semantics compare the
    // subject list [alpha, beta] against the tag list [beta] at position 0
    // and drop everything.
    assert!(result.is_empty(), "positional semantics drop {:?}", both.uuid);
}
