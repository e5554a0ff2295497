//! One service per region directory.
//!
//! ```text
//! <root>/
//! ├── region=FR/   # service directory, see `KnnService::load_dir`
//! ├── region=DE/
//! └── region=XX/   # optional fallback
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::KnnService;
use crate::error::{KnnError, KnnResult};

/// Prefix of every region directory name.
pub const REGION_DIR_PREFIX: &str = "region=";

/// Region name to loaded service.
#[derive(Debug)]
pub struct RegionRouter {
    root: PathBuf,
    fallback: Option<String>,
    ef_search: Option<usize>,
    services: BTreeMap<String, KnnService>,
}

impl RegionRouter {
    /// Router over the region directories under `root`. Nothing is loaded
    /// yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fallback: None,
            ef_search: None,
            services: BTreeMap::new(),
        }
    }

    /// Serve `region` for regions that have no service of their own.
    pub fn with_fallback(mut self, region: impl Into<String>) -> Self {
        self.fallback = Some(region.into());
        self
    }

    /// Search breadth applied to every service loaded afterwards.
    pub fn with_search_breadth(mut self, ef: usize) -> Self {
        self.ef_search = Some(ef);
        self
    }

    /// Directory holding the parts of `region`.
    pub fn region_dir(&self, region: &str) -> PathBuf {
        self.root.join(format!("{}{}", REGION_DIR_PREFIX, region))
    }

    /// Load (or reload) the service of `region`.
    pub fn load(&mut self, region: &str) -> KnnResult<()> {
        let mut service = KnnService::load_dir(self.region_dir(region))?;
        if let Some(ef) = self.ef_search {
            service.set_search_breadth(ef)?;
        }
        if self.services.insert(region.to_string(), service).is_some() {
            info!("Reloaded region {}", region);
        }
        Ok(())
    }

    /// Load every `region=<name>` directory under the root.
    ///
    /// Returns the number of regions loaded.
    pub fn load_all(&mut self) -> KnnResult<usize> {
        let regions = discover_regions(&self.root)?;
        for region in &regions {
            self.load(region)?;
        }
        if let Some(fallback) = &self.fallback {
            if !self.services.contains_key(fallback) {
                warn!("Fallback region {} has no directory under {}", fallback, self.root.display());
            }
        }
        Ok(regions.len())
    }

    /// Service for `region`, or the fallback region's service.
    pub fn service(&self, region: &str) -> KnnResult<&KnnService> {
        self.services
            .get(region)
            .or_else(|| {
                self.fallback
                    .as_ref()
                    .and_then(|fallback| self.services.get(fallback))
            })
            .ok_or_else(|| KnnError::RegionNotFound(region.to_string()))
    }

    /// Loaded region names, sorted.
    pub fn regions(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

/// Region names of the `region=<name>` directories under `root`, sorted.
fn discover_regions(root: &Path) -> KnnResult<Vec<String>> {
    let entries = fs::read_dir(root).map_err(|e| {
        KnnError::persistence_io(root, format!("Failed to read region root: {}", e))
    })?;

    let mut regions = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if let Some(region) = name.strip_prefix(REGION_DIR_PREFIX) {
                if !region.is_empty() {
                    regions.push(region.to_string());
                }
            }
        }
    }
    regions.sort();
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricKind;
    use crate::service::loader::write_part;
    use crate::service::{PartFile, PartKind};
    use tempfile::TempDir;

    fn region_root() -> TempDir {
        let temp = TempDir::new().unwrap();
        for (region, label) in [("FR", 1u64), ("XX", 2u64)] {
            let dir = temp.path().join(format!("region={}", region));
            fs::create_dir(&dir).unwrap();
            write_part(
                &dir,
                PartFile::new(7, 0, PartKind::Searchable),
                MetricKind::Euclidean,
                &[(label, &[1.0, 1.0])],
            );
        }
        fs::create_dir(temp.path().join("other")).unwrap();
        temp
    }

    #[test]
    fn test_load_all_and_route() {
        let temp = region_root();
        let mut router = RegionRouter::new(temp.path())
            .with_fallback("XX")
            .with_search_breadth(40);

        assert_eq!(router.load_all().unwrap(), 2);
        assert_eq!(router.regions(), vec!["FR".to_string(), "XX".to_string()]);

        let fr = router.service("FR").unwrap();
        assert!(fr.has_item(7, 1).unwrap());

        // Unknown regions fall back to XX.
        let de = router.service("DE").unwrap();
        assert!(de.has_item(7, 2).unwrap());
        let part = de.partition(7).unwrap();
        assert_eq!(part.search(&[1.0, 1.0], 1).unwrap()[0].label, 2);
    }

    #[test]
    fn test_no_fallback() {
        let temp = region_root();
        let mut router = RegionRouter::new(temp.path());
        router.load("FR").unwrap();

        assert!(router.service("FR").is_ok());
        assert!(matches!(
            router.service("XX"),
            Err(KnnError::RegionNotFound(_))
        ));
        assert!(router.load("DE").is_err());
    }
}
