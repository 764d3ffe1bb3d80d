//! Disk store persistence and expiry.

use chrono::Utc;
use feedgen::core::{ErrorCategory, FeedgenError};
use feedgen::models::{Feed, Item};
use feedgen::repository::{Key, Repository};
use tempfile::TempDir;

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let key = Key::derived(["https://blog.example/"]);
    let mut feed = Feed::new("https://blog.example/", Utc::now());
    feed.title = "Blog".to_string();

    let repository = Repository::open_disk(dir.path(), 30).unwrap();
    repository.put_feed(&key, &feed).unwrap();
    repository.put_item(&Key::explicit("1"), &Item::new("1", Utc::now())).unwrap();
    repository.close().unwrap();

    let repository = Repository::open_disk(dir.path(), 30).unwrap();
    assert_eq!(repository.get_feed(&key).unwrap(), Some(feed));
    assert!(repository.get_item(&Key::explicit("1")).unwrap().is_some());
    // Feeds and items live in separate key spaces
    assert!(repository.get_feed(&Key::explicit("1")).unwrap().is_none());
    repository.close().unwrap();
}

#[test]
fn test_expired_records_read_as_absent() {
    let dir = TempDir::new().unwrap();
    let repository = Repository::open_disk(dir.path(), 0).unwrap();
    repository.put_item(&Key::explicit("old"), &Item::new("old", Utc::now())).unwrap();
    assert_eq!(repository.get_item(&Key::explicit("old")).unwrap(), None);
    repository.close().unwrap();
}

#[test]
fn test_second_store_on_same_directory_is_refused() {
    let dir = TempDir::new().unwrap();
    let repository = Repository::open_disk(dir.path(), 30).unwrap();
    let error = Repository::open_disk(dir.path(), 30).unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Repository);
    repository.close().unwrap();

    let reopened = Repository::open_disk(dir.path(), 30).unwrap();
    reopened.close().unwrap();
}

#[test]
fn test_closed_repository() {
    let dir = TempDir::new().unwrap();
    for repository in [Repository::memory(), Repository::open_disk(dir.path(), 30).unwrap()] {
        repository.close().unwrap();
        let error = repository.get_item(&Key::explicit("x")).unwrap_err();
        assert!(matches!(error, FeedgenError::RepositoryClosed), "{}", repository.backend_name());
    }
}
