// tests/folder_source.rs
//
// Folder-backed source: discovery, ids, fetch for recovery and atomic write-back.

use std::fs;

use notes_research_bot::fingerprint::fingerprint;
use notes_research_bot::source::{FolderSource, SourceWatcher};

#[tokio::test]
async fn polls_markdown_and_text_notes_recursively() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("notes");
    fs::create_dir_all(root.join("work")).unwrap();
    fs::write(root.join("a.md"), "How do I test async APIs?").unwrap();
    fs::write(root.join("work/b.txt"), "Options for a CI cache").unwrap();
    fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
    fs::write(root.join(".hidden.md"), "secret").unwrap();

    let src = FolderSource::new([&root]);
    let items = src.poll_changes().await.unwrap();
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["notes/a.md", "notes/work/b.txt"]);

    let a = &items[0];
    assert_eq!(a.container, "notes");
    assert_eq!(a.fingerprint, fingerprint("How do I test async APIs?"));
    assert!(a.modified_at.is_some());
}

#[tokio::test]
async fn missing_directory_yields_no_items() {
    let tmp = tempfile::tempdir().unwrap();
    let src = FolderSource::new([tmp.path().join("nope")]);
    assert!(src.poll_changes().await.unwrap().is_empty());
}

#[tokio::test]
async fn fetch_item_round_trips_ids() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("inbox");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("q.md"), "question?").unwrap();

    let src = FolderSource::new([&root]);
    let item = src.fetch_item("inbox/q.md").await.unwrap().unwrap();
    assert_eq!(item.body, "question?");
    assert!(src.fetch_item("inbox/gone.md").await.unwrap().is_none());
    assert!(src.fetch_item("inbox/../../etc/passwd").await.is_err());
    assert!(src.fetch_item("other/q.md").await.is_err());
}

#[tokio::test]
async fn write_result_replaces_file_atomically() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("notes");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.md"), "before").unwrap();

    let src = FolderSource::new([&root]);
    src.write_result("notes/a.md", "after\n\nresearch").await.unwrap();
    assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "after\n\nresearch");

    let leftovers: Vec<_> = fs::read_dir(&root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["a.md".to_string()]);
}

#[tokio::test]
async fn failed_write_leaves_original_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("notes");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("a.md"), "original").unwrap();

    let src = FolderSource::new([&root]);
    // Target directory for a nested id does not exist: the temp file cannot be created.
    assert!(src.write_result("notes/missing/a.md", "new").await.is_err());
    assert_eq!(fs::read_to_string(root.join("a.md")).unwrap(), "original");
}
