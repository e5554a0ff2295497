//! Loading a service from a directory of index parts.
//!
//! ```text
//! <root>/
//! ├── <partition>.<chunk>.knn         # searchable part
//! ├── <partition>.<chunk>.extra.knn   # extra items, fetchable but never searched
//! └── _anything, .anything            # skipped
//! ```
//!
//! Each part is a file written by `Index::save_to_path`; its metric and
//! dimension come from the file header. Files without the `.knn` extension
//! are skipped, while a `.knn` file whose name does not follow the pattern
//! fails the load.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{KnnService, PartitionId};
use crate::error::{KnnError, KnnResult};
use crate::index::Index;

/// Extension of every part file.
pub const PART_EXTENSION: &str = "knn";

const EXTRA_MARKER: &str = "extra";

/// Role of a part within its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartKind {
    /// Queried by searches.
    Searchable,
    /// Only fetched by label.
    Extra,
}

impl PartKind {
    /// Get the kind name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Searchable => "searchable",
            PartKind::Extra => "extra",
        }
    }
}

impl std::fmt::Display for PartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a part, as encoded in its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartFile {
    pub partition: PartitionId,
    pub chunk: u32,
    pub kind: PartKind,
}

impl PartFile {
    pub fn new(partition: PartitionId, chunk: u32, kind: PartKind) -> Self {
        Self {
            partition,
            chunk,
            kind,
        }
    }

    /// Parse `<partition>.<chunk>[.extra].knn`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(PART_EXTENSION)?.strip_suffix('.')?;
        let mut fields = stem.split('.');
        let partition = fields.next()?.parse().ok()?;
        let chunk = fields.next()?.parse().ok()?;
        let kind = match fields.next() {
            None => PartKind::Searchable,
            Some(EXTRA_MARKER) => PartKind::Extra,
            Some(_) => return None,
        };
        if fields.next().is_some() {
            return None;
        }
        Some(Self::new(partition, chunk, kind))
    }

    /// File name this part is stored under.
    pub fn file_name(&self) -> String {
        match self.kind {
            PartKind::Searchable => format!("{}.{}.{}", self.partition, self.chunk, PART_EXTENSION),
            PartKind::Extra => format!(
                "{}.{}.{}.{}",
                self.partition, self.chunk, EXTRA_MARKER, PART_EXTENSION
            ),
        }
    }
}

/// Part files under `root`, ordered by partition, kind and chunk.
fn discover_parts(root: &Path) -> KnnResult<Vec<(PartFile, PathBuf)>> {
    let entries = fs::read_dir(root).map_err(|e| {
        KnnError::persistence_io(root, format!("Failed to read service directory: {}", e))
    })?;

    let mut parts = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            KnnError::persistence_io(root, format!("Failed to read directory entry: {}", e))
        })?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            debug!("Skipping non UTF-8 entry {:?}", path);
            continue;
        };
        if name.starts_with('_') || name.starts_with('.') || !path.is_file() {
            debug!("Skipping {}", path.display());
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(PART_EXTENSION) {
            debug!("Skipping non-part file {}", path.display());
            continue;
        }

        let part = PartFile::parse(&name).ok_or_else(|| {
            KnnError::persistence_format(
                &path,
                "unrecognized part name (expected <partition>.<chunk>[.extra].knn)",
            )
        })?;
        parts.push((part, path));
    }

    parts.sort_by_key(|(part, _)| (part.partition, part.kind, part.chunk));
    Ok(parts)
}

impl KnnService {
    /// Load every part file under `root` into a new service.
    ///
    /// # Errors
    ///
    /// - `PersistenceIo` if `root` cannot be listed or a part cannot be read
    /// - `PersistenceFormat` for a malformed part name or file
    /// - `IncompatiblePart` if parts disagree on metric, dimension or
    ///   normalize flag
    pub fn load_dir(root: impl AsRef<Path>) -> KnnResult<Self> {
        let root = root.as_ref();
        info!("Loading service parts from {}", root.display());

        let mut service = Self::new();
        for (part, path) in discover_parts(root)? {
            debug!(
                "Loading {} part {}/{} from {}",
                part.kind,
                part.partition,
                part.chunk,
                path.display()
            );
            let index = Index::open(&path)?;
            service
                .add_part(part.partition, part.kind, index)
                .map_err(|e| match e {
                    KnnError::IncompatiblePart(message) => {
                        KnnError::IncompatiblePart(format!("{}: {}", path.display(), message))
                    }
                    other => other,
                })?;
        }

        info!(
            "Loaded {} partitions from {}",
            service.partition_ids().len(),
            root.display()
        );
        Ok(service)
    }
}

#[cfg(test)]
pub(crate) fn write_part(
    dir: &Path,
    part: PartFile,
    kind: crate::metric::MetricKind,
    items: &[(crate::engine::Label, &[f32])],
) -> PathBuf {
    let dim = items.first().map(|(_, v)| v.len()).unwrap_or(2);
    let mut index: Index = Index::new(kind, dim).unwrap();
    index
        .initialize_empty(&crate::engine::EngineParams::new(64))
        .unwrap();
    for (label, vector) in items {
        index.insert(vector, *label).unwrap();
    }
    let path = dir.join(part.file_name());
    index.save_to_path(&path).unwrap();
    path
}
