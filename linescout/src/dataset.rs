use memmap2::Mmap;
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{ServeError, ServeResult};

// Files at or above this size are memory-mapped instead of read whole.
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// A point-in-time, read-only view of the dataset's lines.
///
/// Holds two representations of the same content: the ordered sequence of
/// lines as they appear in the file (for scanning strategies) and a hash
/// set over those lines (for O(1) membership tests). Trailing line
/// terminators are stripped and blank lines are skipped. A sorted
/// permutation of line indices is derived lazily for the binary-search
/// strategy and memoized for the snapshot's lifetime.
#[derive(Debug)]
pub struct DatasetSnapshot {
    lines: Vec<String>,
    index: HashSet<String>,
    sorted_order: OnceCell<Vec<usize>>,
}

impl DatasetSnapshot {
    /// Builds a snapshot from raw file text.
    pub fn from_text(text: &str) -> Self {
        let lines: Vec<String> = text
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        let index = lines.iter().cloned().collect();
        Self {
            lines,
            index,
            sorted_order: OnceCell::new(),
        }
    }

    /// The lines in file order.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// O(1) amortized membership test against the set representation.
    pub fn contains(&self, query: &str) -> bool {
        self.index.contains(query)
    }

    /// Number of (non-blank) lines in the snapshot.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when the backing file had no non-blank lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Indices of `lines` in ascending line order, built on first use.
    pub fn sorted_order(&self) -> &[usize] {
        self.sorted_order.get_or_init(|| {
            let mut order: Vec<usize> = (0..self.lines.len()).collect();
            order.sort_unstable_by(|&a, &b| self.lines[a].cmp(&self.lines[b]));
            order
        })
    }
}

/// Owns the dataset path and applies the re-read policy.
///
/// With `reread_on_query` disabled, one snapshot is built at construction
/// time and shared (via `Arc`) by every query for the process lifetime;
/// no lock is needed because the snapshot is never mutated. With it
/// enabled, every [`DatasetStore::snapshot`] call reads the file again,
/// so each query sees a fully consistent view of whatever is on disk at
/// that moment, at the price of one full file read per query.
#[derive(Debug)]
pub struct DatasetStore {
    path: PathBuf,
    reread_on_query: bool,
    cached: Option<Arc<DatasetSnapshot>>,
}

impl DatasetStore {
    /// Opens the store, performing one full load regardless of policy so
    /// an unreadable dataset fails at startup rather than on the first
    /// query.
    pub fn open(path: impl Into<PathBuf>, reread_on_query: bool) -> ServeResult<Self> {
        let path = path.into();
        let snapshot = Arc::new(load_snapshot(&path)?);
        debug!(
            "Loaded dataset {} ({} lines, reread_on_query={})",
            path.display(),
            snapshot.len(),
            reread_on_query
        );
        let cached = if reread_on_query { None } else { Some(snapshot) };
        Ok(Self {
            path,
            reread_on_query,
            cached,
        })
    }

    /// Returns the snapshot to search, honoring the re-read policy.
    pub fn snapshot(&self) -> ServeResult<Arc<DatasetSnapshot>> {
        match &self.cached {
            Some(snapshot) => Ok(Arc::clone(snapshot)),
            None => Ok(Arc::new(load_snapshot(&self.path)?)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reread_on_query(&self) -> bool {
        self.reread_on_query
    }
}

/// Reads the whole file into a snapshot. Small files are read in one
/// call; large files are memory-mapped first.
fn load_snapshot(path: &Path) -> ServeResult<DatasetSnapshot> {
    let file = File::open(path).map_err(|e| ServeError::dataset_unavailable(path, e))?;
    let size = file
        .metadata()
        .map_err(|e| ServeError::dataset_unavailable(path, e))?
        .len();

    let snapshot = if size >= MMAP_THRESHOLD {
        let mmap =
            unsafe { Mmap::map(&file) }.map_err(|e| ServeError::dataset_unavailable(path, e))?;
        DatasetSnapshot::from_text(&decode_lossy(&mmap, path))
    } else {
        let bytes = std::fs::read(path).map_err(|e| ServeError::dataset_unavailable(path, e))?;
        DatasetSnapshot::from_text(&decode_lossy(&bytes, path))
    };
    Ok(snapshot)
}

fn decode_lossy(bytes: &[u8], path: &Path) -> String {
    let cow = String::from_utf8_lossy(bytes);
    // If it's Owned, at least one invalid sequence was replaced.
    if let std::borrow::Cow::Owned(_) = cow {
        warn!("Invalid UTF-8 replaced in dataset: {}", path.display());
    }
    cow.into_owned()
}
