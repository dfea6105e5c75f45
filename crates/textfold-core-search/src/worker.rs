//! The search worker thread.

use crate::{DiskSearchOptions, SearchMatch, SearchMessage};
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Instant;

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Give other threads a chance to run every this many matches.
const YIELD_EVERY: usize = 50;

pub(crate) struct Worker {
    pub(crate) files: Vec<PathBuf>,
    pub(crate) regex: Regex,
    pub(crate) multi_line: bool,
    pub(crate) options: DiskSearchOptions,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) terminated: Arc<AtomicBool>,
    pub(crate) sender: Sender<SearchMessage>,
}

impl Worker {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn run(self) {
        let started = Instant::now();
        let interval = self.options.status_interval();
        let mut last_status: Option<Instant> = None;
        let mut searched = 0usize;
        let mut total_matches = 0usize;

        for path in &self.files {
            if self.is_cancelled() {
                break;
            }
            if last_status.is_none_or(|at| at.elapsed() >= interval) {
                last_status = Some(Instant::now());
                if self.sender.send(SearchMessage::Searching(path.clone())).is_err() {
                    return;
                }
            }

            searched += 1;
            let matches = match self.search_file(path) {
                Ok(matches) => matches,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "search.file.unreadable");
                    continue;
                }
            };
            if matches.is_empty() {
                continue;
            }

            total_matches += matches.len();
            let message = SearchMessage::Matches {
                path: path.clone(),
                matches,
            };
            if self.sender.send(message).is_err() {
                return;
            }
        }

        tracing::debug!(
            searched,
            matches = total_matches,
            cancelled = self.is_cancelled(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search.done"
        );
        if !self.terminated.load(Ordering::Relaxed) {
            let _ = self.sender.send(SearchMessage::Done);
        }
    }

    fn search_file(&self, path: &Path) -> io::Result<Vec<SearchMatch>> {
        let bytes = std::fs::read(path)?;
        if !self.options.include_binary && is_binary(&bytes) {
            tracing::trace!(path = %path.display(), "search.file.binary");
            return Ok(Vec::new());
        }

        let text = String::from_utf8_lossy(&bytes);
        tracing::trace!(path = %path.display(), bytes = bytes.len(), "search.file");
        Ok(if self.multi_line {
            self.search_whole_text(&text)
        } else {
            self.search_lines(&text)
        })
    }

    fn search_lines(&self, text: &str) -> Vec<SearchMatch> {
        let mut out = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if self.is_cancelled() {
                break;
            }
            for m in self.regex.find_iter(line) {
                if self.is_cancelled() {
                    break;
                }
                if m.is_empty() {
                    continue;
                }
                let start_column = line[..m.start()].chars().count();
                let match_len = m.as_str().chars().count();
                out.push(SearchMatch {
                    line_text: truncate(line, self.options.max_line_len),
                    match_len,
                    start_line: line_no,
                    start_column,
                    end_line: line_no,
                    end_column: start_column + match_len,
                });
                if out.len() % YIELD_EVERY == 0 {
                    thread::yield_now();
                }
            }
        }
        out
    }

    fn search_whole_text(&self, text: &str) -> Vec<SearchMatch> {
        let text = text.replace('\r', "");
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        let position = |offset: usize| {
            let line = line_starts
                .partition_point(|&start| start <= offset)
                .saturating_sub(1);
            let column = text[line_starts[line]..offset].chars().count();
            (line, column)
        };

        let mut out = Vec::new();
        for m in self.regex.find_iter(&text) {
            if self.is_cancelled() {
                break;
            }
            if m.is_empty() {
                continue;
            }
            let (start_line, start_column) = position(m.start());
            let (end_line, end_column) = position(m.end());
            let line_text = text[line_starts[start_line]..]
                .lines()
                .next()
                .unwrap_or_default();
            out.push(SearchMatch {
                line_text: truncate(line_text, self.options.max_line_len),
                match_len: m.as_str().chars().count(),
                start_line,
                start_column,
                end_line,
                end_column,
            });
            if out.len() % YIELD_EVERY == 0 {
                thread::yield_now();
            }
        }
        out
    }
}

/// A NUL byte near the start marks a file as binary.
pub(crate) fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_LEN).any(|&b| b == 0)
}

fn truncate(line: &str, max_chars: usize) -> String {
    match line.char_indices().nth(max_chars) {
        Some((cut, _)) => line[..cut].to_string(),
        None => line.to_string(),
    }
}
