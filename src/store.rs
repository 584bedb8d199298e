use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::config::CachePolicy;
use crate::error::CadastreError;

/// On-disk home of the cached catalog.
#[derive(Debug, Clone)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCatalog {
    pub source: String,
    pub fetched_at: String,
    pub tool: String,
    pub catalog: Catalog,
}

impl Store {
    pub fn new() -> Result<Self, CadastreError> {
        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("cadastre-merger"))
                    .ok()
            })
            .ok_or_else(|| {
                CadastreError::Filesystem("unable to resolve cache directory".to_string())
            })?;
        Ok(Self { cache_root })
    }

    pub fn new_with_paths(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn catalog_path(&self) -> Utf8PathBuf {
        self.cache_root.join("catalog.json")
    }

    /// Returns the cached catalog for `source` if the policy still considers it fresh.
    pub fn read_catalog(
        &self,
        source: &str,
        policy: CachePolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<Catalog>, CadastreError> {
        let CachePolicy::Ttl(ttl) = policy else {
            return Ok(None);
        };
        let path = self.catalog_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        let cached: CachedCatalog = serde_json::from_str(&content)
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        if cached.source != source {
            return Ok(None);
        }
        let fetched_at = DateTime::parse_from_rfc3339(&cached.fetched_at)
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?
            .with_timezone(&Utc);
        let Ok(age) = now.signed_duration_since(fetched_at).to_std() else {
            // fetched_at lies in the future
            return Ok(None);
        };
        if age >= ttl {
            return Ok(None);
        }
        Ok(Some(cached.catalog))
    }

    pub fn write_catalog(
        &self,
        source: &str,
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Result<(), CadastreError> {
        let cached = CachedCatalog {
            source: source.to_string(),
            fetched_at: now.to_rfc3339(),
            tool: format!("cadastre-merge/{}", env!("CARGO_PKG_VERSION")),
            catalog: catalog.clone(),
        };
        let content = serde_json::to_vec_pretty(&cached)
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(&self.catalog_path(), &content)
    }

    /// Deletes the cached catalog. Returns whether anything was removed.
    pub fn clear(&self) -> Result<bool, CadastreError> {
        let path = self.catalog_path();
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        Ok(true)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CadastreError> {
        if let Some(parent) = path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
