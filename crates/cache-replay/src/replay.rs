//! Replaying an event log through the cache engine.
//!
//! The input is JSONL: one wire event per line. Blank lines and lines
//! starting with `#` are ignored. A malformed event is logged and counted;
//! it never stops the replay.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use optimistic_cache::{
    Cache, CacheReader, CacheState, QueryResult, ReducerOptions, SideEffect, SideEffectSink,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that stop a replay.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What to replay with and what to report.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub reducer: ReducerOptions,
    /// Aliases to report; all when empty.
    pub aliases: Vec<String>,
}

/// A malformed line.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedLine {
    pub line: usize,
    pub error: String,
}

/// The outcome of a replay.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: Vec<SkippedLine>,
    pub side_effects: usize,
    pub queries: IndexMap<String, QueryResult>,
    #[serde(skip)]
    pub snapshot: CacheState,
}

/// Counts notifications and traces each one.
#[derive(Debug, Default)]
struct CountingSink {
    emitted: AtomicUsize,
}

impl SideEffectSink for CountingSink {
    fn emit(&self, effect: SideEffect) {
        debug!(?effect, "side effect");
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Replays a file, or stdin when `path` is `-`.
pub fn replay_path(path: &Path, options: &ReplayOptions) -> Result<ReplayReport, ReplayError> {
    let read_error = |source| ReplayError::Read {
        path: path.to_path_buf(),
        source,
    };
    if path == Path::new("-") {
        return replay_reader(io::stdin().lock(), options).map_err(read_error);
    }
    let file = File::open(path).map_err(read_error)?;
    replay_reader(BufReader::new(file), options).map_err(read_error)
}

/// Replays every event from `reader`.
pub fn replay_reader<R: BufRead>(reader: R, options: &ReplayOptions) -> io::Result<ReplayReport> {
    let cache = Cache::with_options(options.reducer, CountingSink::default());
    let mut applied = 0;
    let mut skipped = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        match cache.dispatch_json(text) {
            Ok(_) => applied += 1,
            Err(err) => {
                warn!(line = index + 1, error = %err, "skipping event");
                skipped.push(SkippedLine {
                    line: index + 1,
                    error: err.to_string(),
                });
            }
        }
    }

    let snapshot = cache.snapshot();
    let queries = snapshot
        .queries
        .aliases()
        .filter(|alias| options.aliases.is_empty() || options.aliases.iter().any(|a| a == alias))
        .filter_map(|alias| Some((alias.to_string(), snapshot.get_query_result(alias)?)))
        .collect();

    Ok(ReplayReport {
        applied,
        skipped,
        side_effects: cache.sink().emitted.load(Ordering::Relaxed),
        queries,
        snapshot,
    })
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "applied {} events, skipped {}, {} side effects",
            self.applied,
            self.skipped.len(),
            self.side_effects
        )?;
        for skipped in &self.skipped {
            writeln!(f, "  line {}: {}", skipped.line, skipped.error)?;
        }
        for (alias, result) in &self.queries {
            writeln!(f)?;
            writeln!(
                f,
                "{alias} [{}] {} via {}",
                result.query.collection,
                result.ordered.len(),
                result.via.as_str()
            )?;
            writeln!(f, "{}", "-".repeat(50))?;
            for (path, id) in &result.ordered {
                writeln!(f, "  {path}/{id}")?;
            }
        }
        Ok(())
    }
}
