//! The `feedgen` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use url::Url;

use crate::common::blog_index;

/// A site directory with `index.html` and a configuration reading it through `file://`.
fn site() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("index.html"), blog_index(3)).unwrap();
    fs::write(dir.path().join("archive.html"), blog_index(1)).unwrap();
    let base = Url::from_directory_path(dir.path()).unwrap();
    let config = format!(
        r#"
generators:
  blog:
    type: selector
    url: "{base}index.html"
    list: "article"
    item:
      title: "h2"
      link: {{ selector: "a", attr: "href" }}
  pages:
    type: template
    source: "{base}{{{{ param(name='page') }}}}.html"
    feed:
      title: "{{{{ query_param(name='label') }}}}"
    list: "article"
    item:
      title: "{{{{ item_content | find(css='h2') | text }}}}"
"#
    );
    fs::write(dir.path().join("config.yml"), config).unwrap();
    dir
}

fn feedgen(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("feedgen").unwrap();
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("FEEDGEN_CONFIG")
        .env_remove("FEEDGEN_DATA_DIR");
    cmd
}

#[test]
fn test_generate_prints_feed() {
    let dir = site();
    feedgen(dir.path())
        .args(["--no-cache", "generate", "blog", "-f", "rss"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<rss version=\"2.0\""))
        .stdout(predicate::str::contains("<title>Post 3</title>"));
}

#[test]
fn test_generate_defaults_to_atom() {
    let dir = site();
    feedgen(dir.path())
        .args(["-n", "generate", "blog"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<feed xmlns=\"http://www.w3.org/2005/Atom\">"));
}

#[test]
fn test_parameters_reach_expressions() {
    let dir = site();
    feedgen(dir.path())
        .args(["-n", "generate", "pages", "-f", "rss", "-p", "page=archive", "-q", "label=Old posts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<title>Old posts</title>"))
        .stdout(predicate::str::contains("<title>Post 1</title>"))
        .stdout(predicate::str::contains("Post 2").not());
}

#[test]
fn test_unsupported_format() {
    let dir = site();
    feedgen(dir.path())
        .args(["-n", "generate", "blog", "-f", "json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported output format 'json'"));
}

#[test]
fn test_malformed_parameter() {
    let dir = site();
    feedgen(dir.path())
        .args(["-n", "generate", "pages", "-p", "page"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn test_unknown_generator_suggests_name() {
    let dir = site();
    feedgen(dir.path())
        .args(["-n", "generate", "blgo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Generator 'blgo' not found"))
        .stderr(predicate::str::contains("Did you mean 'blog'?"));
}

#[test]
fn test_missing_config() {
    let dir = TempDir::new().unwrap();
    feedgen(dir.path())
        .args(["-n", "-c", "absent.yml", "generate", "blog"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.yml"));
}

#[test]
fn test_disk_repository_keeps_records() {
    let dir = site();
    let data = dir.path().join("state");
    for _ in 0..2 {
        feedgen(dir.path())
            .args(["--data-dir", data.to_str().unwrap(), "generate", "blog"])
            .assert()
            .success();
    }
    let entries = fs::read_dir(data.join("entries")).unwrap().count();
    // One feed and three items
    assert_eq!(entries, 4);
}
