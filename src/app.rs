use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::{Catalog, CatalogClient};
use crate::config::CachePolicy;
use crate::domain::{Category, dedup_categories};
use crate::error::CadastreError;
use crate::extract::{CategoryFiles, append_category_files, extract_categories};
use crate::fetch::ArchiveClient;
use crate::merge::{SkippedInput, merge_shapefiles};
use crate::package::package;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    pub catalog_cache: CachePolicy,
    /// Parent directory for the per-run scratch directory; system temp dir when `None`.
    pub work_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub territories: Vec<String>,
    pub categories: Vec<Category>,
}

impl RunRequest {
    pub fn new(territories: Vec<String>, categories: Vec<Category>) -> Self {
        Self {
            territories,
            categories,
        }
    }

    /// Rejects empty selections and names the catalog does not know.
    pub fn validate(&self, catalog: &Catalog) -> Result<(), CadastreError> {
        if self.territories.is_empty() {
            return Err(CadastreError::NoTerritoriesSelected);
        }
        if self.categories.is_empty() {
            return Err(CadastreError::NoCategoriesSelected);
        }
        if let Some(unknown) = self
            .territories
            .iter()
            .find(|name| !catalog.contains(name))
        {
            return Err(CadastreError::UnknownTerritory(unknown.clone()));
        }
        Ok(())
    }

    fn unique_territories(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.territories.len());
        for name in &self.territories {
            if !seen.contains(&name.as_str()) {
                seen.push(name);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TerritoryReport {
    pub name: String,
    #[serde(flatten)]
    pub status: TerritoryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TerritoryStatus {
    Extracted { groups: usize },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub base_name: String,
    #[serde(flatten)]
    pub status: CategoryStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryStatus {
    Merged {
        inputs: usize,
        inputs_merged: usize,
        records_written: usize,
        null_geometries: usize,
        skipped: Vec<SkippedInput>,
    },
    NoInputs,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub territories: Vec<TerritoryReport>,
    pub categories: Vec<CategoryReport>,
    pub archive_bytes: Option<usize>,
}

impl RunReport {
    pub fn skipped_territories(&self) -> usize {
        self.territories
            .iter()
            .filter(|territory| matches!(territory.status, TerritoryStatus::Skipped { .. }))
            .count()
    }

    pub fn produced(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories
            .iter()
            .filter(|category| matches!(category.status, CategoryStatus::Merged { .. }))
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub report: RunReport,
    pub archive: Option<Vec<u8>>,
}

impl RunResult {
    pub fn into_archive(self) -> Result<Vec<u8>, CadastreError> {
        self.archive.ok_or(CadastreError::NoDataFound)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub territories: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Catalog,
    Run,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    /// Territories processed so far and the total, during the download phase.
    pub progress: Option<(usize, usize)>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            progress: None,
        }
    }

    pub fn step(message: impl Into<String>, done: usize, total: usize) -> Self {
        Self {
            message: message.into(),
            progress: Some((done, total)),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Clone)]
pub struct App<C: CatalogClient, A: ArchiveClient> {
    store: Store,
    catalog: C,
    archives: A,
    options: AppOptions,
}

impl<C: CatalogClient, A: ArchiveClient> App<C, A> {
    pub fn new(store: Store, catalog: C, archives: A, options: AppOptions) -> Self {
        Self {
            store,
            catalog,
            archives,
            options,
        }
    }

    /// Loads the territory catalog, from cache when fresh.
    ///
    /// Never fails: errors are reported through `sink` and the log, and an
    /// empty catalog is returned.
    pub fn load_catalog(&self, refresh: bool, sink: &dyn ProgressSink) -> Catalog {
        let source = self.catalog.source();
        let policy = self.options.catalog_cache;
        let now = chrono::Utc::now();

        if !refresh {
            match self.store.read_catalog(&source, policy, now) {
                Ok(Some(catalog)) => {
                    sink.event(ProgressEvent::message(format!(
                        "using cached catalog ({} territories)",
                        catalog.len()
                    )));
                    return catalog;
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "ignoring unreadable catalog cache"),
            }
        }

        sink.event(ProgressEvent::message("fetching territory catalog"));
        match self.catalog.fetch_catalog() {
            Ok(catalog) => {
                if !catalog.is_empty()
                    && policy != CachePolicy::Disabled
                    && let Err(err) = self.store.write_catalog(&source, &catalog, now)
                {
                    warn!(%err, "failed to cache catalog");
                }
                sink.event(ProgressEvent::message(format!(
                    "catalog lists {} territories",
                    catalog.len()
                )));
                catalog
            }
            Err(err) => {
                error!(%err, "catalog fetch failed");
                sink.event(ProgressEvent::message(format!("catalog error: {err}")));
                Catalog::default()
            }
        }
    }

    pub fn list(
        &self,
        refresh: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ListResult, CadastreError> {
        let catalog = self.load_catalog(refresh, sink);
        if catalog.is_empty() {
            return Err(CadastreError::EmptyCatalog);
        }
        let territories = catalog
            .sorted_names()
            .into_iter()
            .map(|name| {
                let url = catalog.get(&name).unwrap_or_default().to_string();
                ListEntry { name, url }
            })
            .collect();
        Ok(ListResult { territories })
    }

    pub fn clear_cache(&self, sink: &dyn ProgressSink) -> Result<ClearResult, CadastreError> {
        sink.event(ProgressEvent::message("clearing catalog cache"));
        let cleared = self.store.clear()?;
        Ok(ClearResult { cleared })
    }

    /// Downloads, extracts, merges and packages the selected territories.
    ///
    /// The selection is validated before any download. Per-territory and
    /// per-file failures are recorded in the report; only scratch-directory
    /// and packaging I/O errors abort the run.
    pub fn run(
        &self,
        catalog: &Catalog,
        request: &RunRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, CadastreError> {
        request.validate(catalog)?;
        let territories = request.unique_territories();
        let categories = dedup_categories(&request.categories);

        let scratch = self.scratch_dir()?;
        let mut report = RunReport::default();
        let mut inputs = CategoryFiles::new();

        let total = territories.len();
        for (idx, name) in territories.iter().enumerate() {
            sink.event(ProgressEvent::step(
                format!("Downloading ({}/{total}): {name}", idx + 1),
                idx,
                total,
            ));
            let territory_dir = scratch
                .path()
                .join("territories")
                .join(format!("{idx:04}"));
            let status = match catalog.get(name) {
                Some(url) => match self.fetch_territory(url, &categories, &territory_dir) {
                    Ok(files) => {
                        let groups = files.values().map(Vec::len).sum();
                        append_category_files(&mut inputs, files);
                        TerritoryStatus::Extracted { groups }
                    }
                    Err(err) => {
                        warn!(territory = %name, %err, "failed to process territory");
                        TerritoryStatus::Skipped {
                            reason: err.to_string(),
                        }
                    }
                },
                None => TerritoryStatus::Skipped {
                    reason: "not in catalog".to_string(),
                },
            };
            report.territories.push(TerritoryReport {
                name: name.to_string(),
                status,
            });
            sink.event(ProgressEvent::step(
                format!("Processed ({}/{total}): {name}", idx + 1),
                idx + 1,
                total,
            ));
        }

        let mut produced = Vec::new();
        let mut ordered = categories.clone();
        ordered.sort();
        for category in ordered {
            let base_name = category.output_base_name().to_string();
            let status = match inputs.get(&category) {
                Some(groups) if !groups.is_empty() => {
                    sink.event(ProgressEvent::message(format!(
                        "Merging {}...",
                        category.label()
                    )));
                    let paths: Vec<PathBuf> = groups
                        .iter()
                        .map(|group| group.primary_path.clone())
                        .collect();
                    let output = scratch.path().join(format!("{base_name}.shp"));
                    match merge_shapefiles(&paths, &output) {
                        Ok(merged) => {
                            produced.push(base_name.clone());
                            CategoryStatus::Merged {
                                inputs: paths.len(),
                                inputs_merged: merged.inputs_merged,
                                records_written: merged.records_written,
                                null_geometries: merged.null_geometries,
                                skipped: merged.skipped,
                            }
                        }
                        Err(err) => {
                            warn!(%category, %err, "merge produced no output");
                            CategoryStatus::Failed {
                                reason: err.to_string(),
                            }
                        }
                    }
                }
                _ => CategoryStatus::NoInputs,
            };
            report.categories.push(CategoryReport {
                category,
                base_name,
                status,
            });
        }

        let archive = package(scratch.path(), &produced)?;
        report.archive_bytes = archive.as_ref().map(Vec::len);
        match &archive {
            Some(bytes) => {
                info!(bytes = bytes.len(), outputs = produced.len(), "packaged outputs");
                sink.event(ProgressEvent::message("Done!"));
            }
            None => sink.event(ProgressEvent::message("no data found")),
        }

        Ok(RunResult { report, archive })
    }

    fn fetch_territory(
        &self,
        url: &str,
        categories: &[Category],
        territory_dir: &Path,
    ) -> Result<CategoryFiles, CadastreError> {
        let bytes = self.archives.download(url)?;
        extract_categories(&bytes, categories, territory_dir)
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir, CadastreError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cadastre-merge");
        let dir = match &self.options.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)
                    .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|err| CadastreError::Filesystem(err.to_string()))
    }
}
