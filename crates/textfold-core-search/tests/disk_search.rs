use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use textfold_core_search::{DiskSearch, DiskSearchOptions, SearchError, SearchMatch, SearchMessage};

const TIMEOUT: Duration = Duration::from_secs(10);

fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn single(line_text: &str, line: usize, column: usize, len: usize) -> SearchMatch {
    SearchMatch {
        line_text: line_text.to_string(),
        match_len: len,
        start_line: line,
        start_column: column,
        end_line: line,
        end_column: column + len,
    }
}

#[test]
fn test_matches_are_batched_per_file() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "fn main() {}\nlet x = 1;\nfn helper() {}\n".as_bytes());
    let b = write(&dir, "b.txt", b"nothing here\n");
    let c = write(&dir, "c.txt", "// héllo\r\nfn ünïcode() {}\n".as_bytes());

    let handle = DiskSearch::start(
        vec![a.clone(), b, c.clone()],
        r"fn \w+",
        DiskSearchOptions::default(),
    )
    .unwrap();
    let results = handle.collect_matches();

    assert_eq!(
        results,
        vec![
            (
                a,
                vec![
                    single("fn main() {}", 0, 0, 7),
                    single("fn helper() {}", 2, 0, 9),
                ]
            ),
            (c, vec![single("fn ünïcode() {}", 1, 0, 10)]),
        ]
    );
}

#[test]
fn test_columns_are_characters() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", "ééé needle\n".as_bytes());

    let handle = DiskSearch::start(vec![a.clone()], "needle", DiskSearchOptions::default()).unwrap();
    assert_eq!(
        handle.collect_matches(),
        vec![(a, vec![single("ééé needle", 0, 4, 6)])]
    );
}

#[test]
fn test_case_insensitive() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", b"Needle NEEDLE needle\n");

    let options = DiskSearchOptions {
        case_sensitive: false,
        ..DiskSearchOptions::default()
    };
    let handle = DiskSearch::start(vec![a], "needle", options).unwrap();
    let results = handle.collect_matches();
    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].1.iter().map(|m| m.start_column).collect::<Vec<_>>(),
        vec![0, 7, 14]
    );
}

#[test]
fn test_binary_files_are_skipped_unless_requested() {
    let dir = TempDir::new().unwrap();
    let bin = write(&dir, "blob.bin", b"needle\0\x01\x02");

    let handle = DiskSearch::start(vec![bin.clone()], "needle", DiskSearchOptions::default()).unwrap();
    assert!(handle.collect_matches().is_empty());

    let options = DiskSearchOptions {
        include_binary: true,
        ..DiskSearchOptions::default()
    };
    let handle = DiskSearch::start(vec![bin.clone()], "needle", options).unwrap();
    let results = handle.collect_matches();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, bin);
}

#[test]
fn test_multi_line_pattern() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", b"one\r\ntwo {\r\n  three\r\n}\r\n");

    let handle = DiskSearch::start(vec![a], r"\{\n\s*thr", DiskSearchOptions::default()).unwrap();
    let results = handle.collect_matches();
    assert_eq!(
        results[0].1,
        vec![SearchMatch {
            line_text: "two {".to_string(),
            match_len: 7,
            start_line: 1,
            start_column: 4,
            end_line: 2,
            end_column: 5,
        }]
    );
}

#[test]
fn test_multi_line_dollar_matches_line_end() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", b"a;\nb\nc;\nd\n");

    let handle = DiskSearch::start(vec![a], r";$\n\w", DiskSearchOptions::default()).unwrap();
    let results = handle.collect_matches();
    let starts: Vec<(usize, usize)> = results[0]
        .1
        .iter()
        .map(|m| (m.start_line, m.end_line))
        .collect();
    assert_eq!(starts, vec![(0, 1), (2, 3)]);
}

#[test]
fn test_empty_matches_are_ignored() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", b"abc\n");

    let handle = DiskSearch::start(vec![a], "x*", DiskSearchOptions::default()).unwrap();
    assert!(handle.collect_matches().is_empty());
}

#[test]
fn test_empty_file_list_is_done_immediately() {
    let handle = DiskSearch::start(Vec::new(), "x", DiskSearchOptions::default()).unwrap();
    assert!(!handle.is_searching());
    assert_eq!(handle.recv_timeout(TIMEOUT), Ok(SearchMessage::Done));
}

#[test]
fn test_unreadable_files_are_skipped() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.txt");
    let a = write(&dir, "a.txt", b"needle\n");

    let handle = DiskSearch::start(vec![missing, a.clone()], "needle", DiskSearchOptions::default())
        .unwrap();
    let results = handle.collect_matches();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, a);
}

#[test]
fn test_first_file_status_is_reported() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.txt", b"x\n");

    let handle = DiskSearch::start(vec![a.clone()], "y", DiskSearchOptions::default()).unwrap();
    assert_eq!(
        handle.recv_timeout(TIMEOUT),
        Ok(SearchMessage::Searching(a))
    );
    assert_eq!(handle.recv_timeout(TIMEOUT), Ok(SearchMessage::Done));
}

#[test]
fn test_invalid_pattern() {
    let result = DiskSearch::start(Vec::new(), "(", DiskSearchOptions::default());
    assert!(matches!(result, Err(SearchError::InvalidPattern(_))));
}

#[test]
fn test_cancel_still_reports_done() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..200)
        .map(|i| write(&dir, &format!("f{i}.txt"), b"needle\n".repeat(100).as_slice()))
        .collect();

    let handle = DiskSearch::start(files, "needle", DiskSearchOptions::default()).unwrap();
    handle.cancel();

    let mut saw_done = false;
    while let Ok(message) = handle.recv_timeout(TIMEOUT) {
        if message == SearchMessage::Done {
            saw_done = true;
            break;
        }
    }
    assert!(saw_done);
}

#[test]
fn test_terminate_stops_the_worker() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..50)
        .map(|i| write(&dir, &format!("f{i}.txt"), b"needle\n".repeat(100).as_slice()))
        .collect();

    let mut handle = DiskSearch::start(files, "needle", DiskSearchOptions::default()).unwrap();
    handle.terminate();
    assert!(!handle.is_searching());

    // The worker is gone: the queue drains and then disconnects.
    while handle.try_recv().is_ok() {}
    assert!(handle.recv().is_none());
}
