#![warn(missing_docs)]
//! `textfold-core-search` - regex search over files on disk.
//!
//! A search runs on its own worker thread and reports through a channel: the file currently
//! being searched (throttled), the matches of each file as one batch, and a final
//! [`SearchMessage::Done`]. The returned [`SearchHandle`] cancels the search cooperatively.
//!
//! ```no_run
//! use textfold_core_search::{DiskSearch, DiskSearchOptions, SearchMessage};
//!
//! let handle = DiskSearch::start(
//!     vec!["src/lib.rs".into()],
//!     r"fn \w+",
//!     DiskSearchOptions::default(),
//! )
//! .unwrap();
//!
//! for message in handle.iter() {
//!     match message {
//!         SearchMessage::Matches { path, matches } => {
//!             println!("{}: {} matches", path.display(), matches.len())
//!         }
//!         SearchMessage::Done => break,
//!         SearchMessage::Searching(_) => {}
//!     }
//! }
//! ```

mod error;
mod worker;

pub use error::SearchError;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use worker::Worker;

/// Disk search options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSearchOptions {
    /// Search files that look binary (contain a NUL byte near the start).
    pub include_binary: bool,
    /// Match case sensitively.
    pub case_sensitive: bool,
    /// Reported line text is truncated to this many characters.
    pub max_line_len: usize,
    /// Minimum delay between two [`SearchMessage::Searching`] reports, in milliseconds.
    pub status_interval_ms: u64,
}

impl Default for DiskSearchOptions {
    fn default() -> Self {
        Self {
            include_binary: false,
            case_sensitive: true,
            max_line_len: 1024,
            status_interval_ms: 100,
        }
    }
}

impl DiskSearchOptions {
    /// Status throttle interval.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

/// A single match.
///
/// Lines are 0-based, columns are character offsets. The end position is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    /// Text of the first matched line (truncated).
    pub line_text: String,
    /// Length of the match in characters.
    pub match_len: usize,
    /// Line the match starts on.
    pub start_line: usize,
    /// Column the match starts at.
    pub start_column: usize,
    /// Line the match ends on.
    pub end_line: usize,
    /// Column the match ends at.
    pub end_column: usize,
}

/// Progress and results reported by a running search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMessage {
    /// The worker started on this file.
    Searching(PathBuf),
    /// All matches of one file.
    Matches {
        /// File the matches belong to.
        path: PathBuf,
        /// Matches in document order.
        matches: Vec<SearchMatch>,
    },
    /// The search finished or was cancelled. Not sent after [`SearchHandle::terminate`].
    Done,
}

/// Entry point for disk searches.
pub struct DiskSearch;

impl DiskSearch {
    /// Start searching `files` for `pattern`.
    ///
    /// A pattern containing `\n` is matched against whole files; otherwise it is matched line
    /// by line.
    pub fn start(
        files: Vec<PathBuf>,
        pattern: &str,
        options: DiskSearchOptions,
    ) -> Result<SearchHandle, SearchError> {
        let multi_line = pattern.contains("\\n") || pattern.contains('\n');
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(!options.case_sensitive)
            .multi_line(multi_line)
            .build()?;

        let (sender, receiver) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let terminated = Arc::new(AtomicBool::new(false));

        if files.is_empty() {
            // Nothing to do: report completion without a worker.
            let _ = sender.send(SearchMessage::Done);
            return Ok(SearchHandle {
                receiver,
                cancelled,
                terminated,
                worker: None,
            });
        }

        tracing::debug!(files = files.len(), pattern, multi_line, "search.start");
        let worker = Worker {
            files,
            regex,
            multi_line,
            options,
            cancelled: Arc::clone(&cancelled),
            terminated: Arc::clone(&terminated),
            sender,
        };
        let join = thread::Builder::new()
            .name("textfold-disk-search".to_string())
            .spawn(move || worker.run())?;

        Ok(SearchHandle {
            receiver,
            cancelled,
            terminated,
            worker: Some(join),
        })
    }
}

/// Handle to a running search. Dropping it cancels the search and waits for the worker.
pub struct SearchHandle {
    receiver: Receiver<SearchMessage>,
    cancelled: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SearchHandle {
    /// Ask the worker to stop. It still reports [`SearchMessage::Done`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Stop the worker without a final [`SearchMessage::Done`] and wait for it to exit.
    pub fn terminate(&mut self) {
        self.terminated.store(true, Ordering::Relaxed);
        self.cancel();
        self.join();
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("search.worker.panicked");
            }
        }
    }

    /// Whether the worker thread is still running.
    pub fn is_searching(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Block for the next message; `None` once the worker is gone and the queue is empty.
    pub fn recv(&self) -> Option<SearchMessage> {
        self.receiver.recv().ok()
    }

    /// Next message, if one is queued.
    pub fn try_recv(&self) -> Result<SearchMessage, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<SearchMessage, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator over messages.
    pub fn iter(&self) -> impl Iterator<Item = SearchMessage> + '_ {
        self.receiver.iter()
    }

    /// Block until the search is done and return every file's matches.
    pub fn collect_matches(&self) -> Vec<(PathBuf, Vec<SearchMatch>)> {
        let mut out = Vec::new();
        for message in self.iter() {
            match message {
                SearchMessage::Matches { path, matches } => out.push((path, matches)),
                SearchMessage::Done => break,
                SearchMessage::Searching(_) => {}
            }
        }
        out
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}
