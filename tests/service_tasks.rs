mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use support::{Harness, WORKSPACE_ID};
use tasks_plan::codec::{self, SOURCE_TAG};
use tasks_plan::error::Error;
use tasks_plan::model::{
    CreateTaskInput, ReorderUpdate, TaskFilter, TaskPriority, TaskStatus, UpdateTaskInput,
};
use tasks_plan::workspace::WorkspaceConfig;

fn status_tags(tags: &[String]) -> Vec<&String> {
    tags.iter().filter(|tag| tag.starts_with("status:")).collect()
}

#[tokio::test]
async fn create_requires_connected_workspace() {
    let harness = Harness::new();
    let err = harness
        .service
        .create_task(CreateTaskInput::new("Write docs"))
        .await
        .expect_err("no workspace");
    assert!(matches!(err, Error::NoWorkspace));
    assert_eq!(harness.store.calls.creates(), 0);
}

#[tokio::test]
async fn create_requires_fragment_type() {
    let harness = Harness::new();
    harness
        .workspace
        .save(&WorkspaceConfig {
            workspace_id: WORKSPACE_ID.to_string(),
            workspace_name: "Main".to_string(),
            task_fragment_type_id: None,
        })
        .expect("save");

    let err = harness
        .service
        .create_task(CreateTaskInput::new("Write docs"))
        .await
        .expect_err("no fragment type");
    assert!(matches!(err, Error::NoFragmentType));
}

#[tokio::test]
async fn create_rejects_blank_title_and_reserved_tags() {
    let harness = Harness::connected();
    let err = harness
        .service
        .create_task(CreateTaskInput::new("   "))
        .await
        .expect_err("blank title");
    assert!(matches!(err, Error::InvalidArgument(_)));

    let mut input = CreateTaskInput::new("Tagged");
    input.tags = Some(vec!["status:done".to_string()]);
    let err = harness.service.create_task(input).await.expect_err("reserved");
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(harness.store.calls.creates(), 0);
}

#[tokio::test]
async fn created_tasks_are_appended_in_order() {
    let harness = Harness::connected();
    let first = harness
        .service
        .create_task(CreateTaskInput::new("First"))
        .await
        .expect("first");
    let mut input = CreateTaskInput::new("Second");
    input.priority = Some(TaskPriority::High);
    input.tags = Some(vec!["ui".to_string(), "ui".to_string()]);
    input.projects = Some(vec!["web".to_string()]);
    let second = harness.service.create_task(input).await.expect("second");

    assert_eq!(first.list_order, 0);
    assert_eq!(second.list_order, 1);
    assert_eq!(second.kanban_order, 1);
    assert_eq!(second.tags, vec!["ui".to_string()]);

    let stored = harness.store.fragment(&second.id).expect("stored");
    for tag in ["task", SOURCE_TAG, "status:todo", "priority:high", "project:web", "ui"] {
        assert!(stored.has_tag(tag), "missing {tag}");
    }
    assert_eq!(stored.summary.as_deref(), Some("Task: Second [todo/high]"));
}

#[tokio::test]
async fn identical_concurrent_creates_share_one_request() {
    let harness = Harness::connected();
    harness.store.set_create_delay(Duration::from_millis(50));

    let input = CreateTaskInput::new("Ship it");
    let (a, b) = tokio::join!(
        harness.service.create_task(input.clone()),
        harness.service.create_task(input.clone()),
    );
    let (a, b) = (a.expect("first"), b.expect("second"));
    assert_eq!(a.id, b.id);
    assert_eq!(harness.store.calls.creates(), 1);

    // Still inside the grace window.
    let c = harness.service.create_task(input).await.expect("third");
    assert_eq!(c.id, a.id);
    assert_eq!(harness.store.calls.creates(), 1);
}

#[tokio::test]
async fn different_creates_are_not_merged() {
    let harness = Harness::connected();
    let a = harness
        .service
        .create_task(CreateTaskInput::new("One"))
        .await
        .expect("one");
    let mut input = CreateTaskInput::new("One");
    input.priority = Some(TaskPriority::Urgent);
    let b = harness.service.create_task(input).await.expect("urgent one");
    assert_ne!(a.id, b.id);
    assert_eq!(harness.store.calls.creates(), 2);
}

#[tokio::test]
async fn delete_archives_with_single_status_tag() {
    let harness = Harness::connected();
    let task = harness
        .service
        .create_task(CreateTaskInput::new("Old"))
        .await
        .expect("create");

    harness.service.delete_task(&task.id).await.expect("delete");

    let stored = harness.store.fragment(&task.id).expect("still stored");
    assert_eq!(status_tags(&stored.tags), vec!["status:archived"]);
    assert_eq!(codec::decode(&stored).status, TaskStatus::Archived);

    let visible = harness
        .service
        .list_tasks(&TaskFilter::default())
        .await
        .expect("list");
    assert!(visible.is_empty());

    let archived = harness
        .service
        .list_tasks(&TaskFilter {
            status: Some(TaskStatus::Archived),
            ..TaskFilter::default()
        })
        .await
        .expect("archived");
    assert_eq!(archived.len(), 1);
}

#[tokio::test]
async fn reads_are_cached_until_a_write() {
    let harness = Harness::connected();
    let task = harness
        .service
        .create_task(CreateTaskInput::new("Draft"))
        .await
        .expect("create");

    harness.service.list_tasks(&TaskFilter::default()).await.expect("list");
    harness.service.list_tasks(&TaskFilter::default()).await.expect("list");
    assert_eq!(harness.store.calls.lists(), 1);

    let changes = UpdateTaskInput {
        title: Some("Final".to_string()),
        status: Some(TaskStatus::InProgress),
        ..UpdateTaskInput::default()
    };
    harness.service.update_task(&task.id, changes).await.expect("update");

    let tasks = harness.service.list_tasks(&TaskFilter::default()).await.expect("list");
    assert_eq!(harness.store.calls.lists(), 2);
    assert_eq!(tasks[0].title, "Final");
    assert_eq!(tasks[0].status, TaskStatus::InProgress);
}

#[tokio::test]
async fn update_clears_dates_with_empty_string() {
    let harness = Harness::connected();
    let mut input = CreateTaskInput::new("Dated");
    input.start_date = Some("2024-01-01".to_string());
    input.end_date = Some("2024-02-01".to_string());
    let task = harness.service.create_task(input).await.expect("create");

    let changes = UpdateTaskInput {
        end_date: Some(String::new()),
        ..UpdateTaskInput::default()
    };
    let updated = harness.service.update_task(&task.id, changes).await.expect("update");
    assert_eq!(updated.start_date.as_deref(), Some("2024-01-01"));
    assert!(updated.end_date.is_none());

    let stored = codec::decode(&harness.store.fragment(&task.id).expect("stored"));
    assert!(stored.end_date.is_none());
}

#[tokio::test]
async fn update_of_unknown_task_is_not_found() {
    let harness = Harness::connected();
    let err = harness
        .service
        .update_task("missing", UpdateTaskInput::default())
        .await
        .expect_err("missing");
    assert!(matches!(err, Error::TaskNotFound(_)));
}

#[tokio::test]
async fn comment_uses_token_identity() {
    let harness = Harness::connected_as("Ada");
    let task = harness
        .service
        .create_task(CreateTaskInput::new("Review"))
        .await
        .expect("create");

    let updated = harness
        .service
        .add_comment(&task.id, "  Looks good ")
        .await
        .expect("comment");
    assert_eq!(updated.comments.len(), 1);
    let comment = &updated.comments[0];
    assert_eq!(comment.text, "Looks good");
    assert_eq!(comment.author, "Ada");
    assert_eq!(comment.author_email, "ada@example.com");
    assert!(!comment.id.is_empty());

    let fragment = harness.store.fragment(&task.id).expect("stored");
    let marker = "\n\n<!-- comments:json -->\n";
    let start = fragment.content.find(marker).expect("comments marker") + marker.len();
    assert!(fragment.content[start..].starts_with('['));
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(&fragment.content[start..]).expect("comments json");
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0]["text"], "Looks good");

    let stored = codec::decode(&fragment);
    assert_eq!(stored.comments, updated.comments);
}

#[tokio::test]
async fn comment_without_identity_is_unknown_author() {
    let harness = Harness::connected();
    let task = harness
        .service
        .create_task(CreateTaskInput::new("Review"))
        .await
        .expect("create");
    let updated = harness
        .service
        .add_comment(&task.id, "ping")
        .await
        .expect("comment");
    assert_eq!(updated.comments[0].author, "Unknown");

    let err = harness
        .service
        .add_comment(&task.id, "  ")
        .await
        .expect_err("empty");
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[tokio::test]
async fn reorder_writes_every_task_and_notifies_once() {
    let harness = Harness::connected();
    let a = harness.service.create_task(CreateTaskInput::new("A")).await.expect("a");
    let b = harness.service.create_task(CreateTaskInput::new("B")).await.expect("b");

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    harness.service.broadcast().subscribe(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    harness
        .service
        .reorder_tasks(vec![
            ReorderUpdate {
                id: a.id.clone(),
                list_order: Some(1),
                ..ReorderUpdate::default()
            },
            ReorderUpdate {
                id: b.id.clone(),
                list_order: Some(0),
                status: Some(TaskStatus::Done),
                ..ReorderUpdate::default()
            },
        ])
        .await
        .expect("reorder");
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    let tasks = harness
        .service
        .list_tasks(&TaskFilter::default())
        .await
        .expect("list");
    let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["B", "A"]);
    assert_eq!(tasks[0].status, TaskStatus::Done);
}

#[tokio::test]
async fn partially_failed_reorder_still_notifies() {
    let harness = Harness::connected();
    let a = harness.service.create_task(CreateTaskInput::new("A")).await.expect("a");
    let b = harness.service.create_task(CreateTaskInput::new("B")).await.expect("b");
    harness.store.fail_updates_for(&b.id);

    let before = harness.service.broadcast().generation();
    let err = harness
        .service
        .reorder_tasks(vec![
            ReorderUpdate {
                id: a.id.clone(),
                list_order: Some(5),
                ..ReorderUpdate::default()
            },
            ReorderUpdate {
                id: b.id,
                list_order: Some(6),
                ..ReorderUpdate::default()
            },
        ])
        .await
        .expect_err("partial failure");
    assert!(matches!(err, Error::Api { status: 500, .. }));
    assert_eq!(harness.service.broadcast().generation(), before + 1);
    assert_eq!(harness.service.get_task(&a.id).await.expect("a").list_order, 5);
}

#[tokio::test]
async fn fully_failed_reorder_does_not_notify() {
    let harness = Harness::connected();
    let a = harness.service.create_task(CreateTaskInput::new("A")).await.expect("a");
    harness.store.fail_updates_for(&a.id);

    let before = harness.service.broadcast().generation();
    harness
        .service
        .reorder_tasks(vec![ReorderUpdate {
            id: a.id,
            list_order: Some(5),
            ..ReorderUpdate::default()
        }])
        .await
        .expect_err("failure");
    assert_eq!(harness.service.broadcast().generation(), before);
}

#[tokio::test]
async fn empty_reorder_is_a_no_op() {
    let harness = Harness::connected();
    harness.service.reorder_tasks(Vec::new()).await.expect("noop");
    assert_eq!(harness.store.calls.updates(), 0);
    assert_eq!(harness.service.broadcast().generation(), 0);
}

#[tokio::test]
async fn migrate_tags_legacy_fragments() {
    let harness = Harness::connected();
    harness.store.insert(tasks_plan::model::Fragment {
        id: "legacy".to_string(),
        title: "Legacy".to_string(),
        content: "---\nstatus: \"todo\"\n---\n\nold".to_string(),
        tags: vec!["task".to_string(), "status:todo".to_string()],
        workspace_id: Some(WORKSPACE_ID.to_string()),
        ..Default::default()
    });

    assert!(harness
        .service
        .list_tasks(&TaskFilter::default())
        .await
        .expect("before")
        .is_empty());

    assert_eq!(harness.service.migrate_source_tag().await.expect("migrate"), 1);
    assert_eq!(harness.service.migrate_source_tag().await.expect("again"), 0);

    let tasks = harness
        .service
        .list_tasks(&TaskFilter::default())
        .await
        .expect("after");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].description, "old");
}

#[tokio::test]
async fn migrate_without_workspace_does_nothing() {
    let harness = Harness::new();
    assert_eq!(harness.service.migrate_source_tag().await.expect("migrate"), 0);
    assert_eq!(harness.store.calls.lists(), 0);
}
