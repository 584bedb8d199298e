mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use cadastre_merger::app::{
    App, AppOptions, CategoryStatus, ProgressEvent, ProgressSink, RunRequest, TerritoryStatus,
};
use cadastre_merger::catalog::{Catalog, CatalogClient};
use cadastre_merger::config::CachePolicy;
use cadastre_merger::domain::{Category, ResourceEntry};
use cadastre_merger::error::CadastreError;
use cadastre_merger::fetch::ArchiveClient;
use cadastre_merger::merge::count_records;
use cadastre_merger::output::JsonOutput;
use cadastre_merger::store::Store;

use common::{entry_names, territory_zip, unpack, zip_bytes};

const RIGA: &str = "1. Riga";
const JELGAVA: &str = "10. Jelgava";

#[derive(Default)]
struct MockCatalog {
    entries: Vec<ResourceEntry>,
    fail: bool,
    calls: Arc<Mutex<usize>>,
}

impl CatalogClient for MockCatalog {
    fn fetch_catalog(&self) -> Result<Catalog, CadastreError> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(CadastreError::CatalogHttp("connection refused".to_string()));
        }
        Ok(Catalog::from_entries(self.entries.clone()))
    }

    fn source(&self) -> String {
        "mock://catalog".to_string()
    }
}

#[derive(Default)]
struct MockArchives {
    archives: HashMap<String, Vec<u8>>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl ArchiveClient for MockArchives {
    fn download(&self, url: &str) -> Result<Vec<u8>, CadastreError> {
        self.requested.lock().unwrap().push(url.to_string());
        self.archives
            .get(url)
            .cloned()
            .ok_or_else(|| CadastreError::DownloadHttp(format!("connection reset: {url}")))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn entry(name: &str, url: &str) -> ResourceEntry {
    ResourceEntry {
        name: name.to_string(),
        url: url.to_string(),
        format: "ZIP".to_string(),
    }
}

fn temp_store(temp: &tempfile::TempDir) -> Store {
    Store::new_with_paths(Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap())
}

fn catalog() -> Catalog {
    Catalog::from_entries(vec![
        entry(JELGAVA, "https://x/jelgava.zip"),
        entry(RIGA, "https://x/riga.zip"),
    ])
}

struct Fixture {
    temp: tempfile::TempDir,
    app: App<MockCatalog, MockArchives>,
    requested: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

fn fixture(archives: HashMap<String, Vec<u8>>) -> Fixture {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let options = AppOptions {
        catalog_cache: CachePolicy::Disabled,
        work_dir: Some(temp.path().join("work")),
    };
    let archives = MockArchives {
        archives,
        ..MockArchives::default()
    };
    let requested = archives.requested.clone();
    let app = App::new(store, MockCatalog::default(), archives, options);
    Fixture {
        temp,
        app,
        requested,
    }
}

fn both_territories(temp: &std::path::Path) -> HashMap<String, Vec<u8>> {
    HashMap::from([
        (
            "https://x/riga.zip".to_string(),
            territory_zip(&temp.join("src"), "Riga", 3),
        ),
        (
            "https://x/jelgava.zip".to_string(),
            territory_zip(&temp.join("src"), "Jelgava", 4),
        ),
    ])
}

#[test]
fn merges_parcels_across_territories() {
    let src = tempfile::tempdir().unwrap();
    let fx = fixture(both_territories(src.path()));
    let catalog = catalog();
    assert_eq!(catalog.sorted_names(), vec![RIGA, JELGAVA]);

    let request = RunRequest::new(catalog.sorted_names(), vec![Category::Parcel]);
    let sink = RecordingSink::default();
    let result = fx.app.run(&catalog, &request, &sink).unwrap();

    let archive = result.archive.clone().unwrap();
    let names = entry_names(&archive);
    for ext in ["shp", "shx", "dbf", "prj", "cpg"] {
        assert!(names.contains(&format!("Parcels_merged.{ext}")), "{names:?}");
    }
    assert!(!names.iter().any(|name| name.starts_with("Buildings_merged")));

    let unpacked = fx.temp.path().join("unpacked");
    unpack(&archive, &unpacked);
    assert_eq!(count_records(&unpacked.join("Parcels_merged.shp")).unwrap(), 7);

    let report = &result.report;
    assert_eq!(report.territories.len(), 2);
    assert_eq!(report.territories[0].name, RIGA);
    assert_eq!(report.skipped_territories(), 0);
    assert_eq!(report.categories.len(), 1);
    assert_matches!(
        &report.categories[0].status,
        CategoryStatus::Merged { inputs: 2, records_written: 7, .. }
    );
    assert_eq!(report.archive_bytes, Some(archive.len()));

    let events = sink.events.lock().unwrap();
    let last_step = events.iter().rev().find_map(|event| event.progress);
    assert_eq!(last_step, Some((2, 2)));
    assert_eq!(events.last().unwrap().message, "Done!");
}

#[test]
fn both_categories_produce_both_outputs() {
    let src = tempfile::tempdir().unwrap();
    let fx = fixture(both_territories(src.path()));
    let catalog = catalog();

    let request = RunRequest::new(
        vec![RIGA.to_string()],
        vec![Category::Building, Category::Parcel],
    );
    let result = fx.app.run(&catalog, &request, &JsonOutput).unwrap();

    let names = entry_names(result.archive.as_ref().unwrap());
    assert!(names.contains(&"Parcels_merged.shp".to_string()));
    assert!(names.contains(&"Buildings_merged.shp".to_string()));
    let categories: Vec<_> = result
        .report
        .categories
        .iter()
        .map(|category| category.category)
        .collect();
    assert_eq!(categories, vec![Category::Parcel, Category::Building]);
}

#[test]
fn failed_download_skips_only_that_territory() {
    let src = tempfile::tempdir().unwrap();
    let mut archives = both_territories(src.path());
    archives.remove("https://x/jelgava.zip");
    let fx = fixture(archives);
    let catalog = catalog();

    let request = RunRequest::new(
        vec![RIGA.to_string(), JELGAVA.to_string()],
        vec![Category::Parcel],
    );
    let result = fx.app.run(&catalog, &request, &JsonOutput).unwrap();

    assert_eq!(result.report.skipped_territories(), 1);
    assert_matches!(
        &result.report.territories[1].status,
        TerritoryStatus::Skipped { reason } if reason.contains("connection reset")
    );

    let unpacked = fx.temp.path().join("unpacked");
    unpack(result.archive.as_ref().unwrap(), &unpacked);
    assert_eq!(count_records(&unpacked.join("Parcels_merged.shp")).unwrap(), 3);
}

#[test]
fn corrupt_archive_is_skipped() {
    let src = tempfile::tempdir().unwrap();
    let mut archives = both_territories(src.path());
    archives.insert("https://x/jelgava.zip".to_string(), b"<html>busy</html>".to_vec());
    let fx = fixture(archives);

    let request = RunRequest::new(
        vec![RIGA.to_string(), JELGAVA.to_string()],
        vec![Category::Parcel],
    );
    let result = fx.app.run(&catalog(), &request, &JsonOutput).unwrap();

    assert_eq!(result.report.skipped_territories(), 1);
    assert!(result.archive.is_some());
}

#[test]
fn missing_categories_rejected_before_download() {
    let src = tempfile::tempdir().unwrap();
    let fx = fixture(both_territories(src.path()));

    let request = RunRequest::new(vec![RIGA.to_string()], vec![]);
    let err = fx.app.run(&catalog(), &request, &JsonOutput).unwrap_err();

    assert_matches!(err, CadastreError::NoCategoriesSelected);
    assert!(fx.requested().is_empty());
}

#[test]
fn unknown_territory_rejected_before_download() {
    let src = tempfile::tempdir().unwrap();
    let fx = fixture(both_territories(src.path()));

    let request = RunRequest::new(
        vec![RIGA.to_string(), "7. Ventspils".to_string()],
        vec![Category::Parcel],
    );
    let err = fx.app.run(&catalog(), &request, &JsonOutput).unwrap_err();

    assert_matches!(err, CadastreError::UnknownTerritory(name) if name == "7. Ventspils");
    assert!(fx.requested().is_empty());
}

#[test]
fn no_matching_files_means_no_data() {
    let archive = zip_bytes(&[("Riga/README.txt", "nothing here")]);
    let fx = fixture(HashMap::from([("https://x/riga.zip".to_string(), archive)]));

    let request = RunRequest::new(vec![RIGA.to_string()], vec![Category::Parcel]);
    let result = fx.app.run(&catalog(), &request, &JsonOutput).unwrap();

    assert!(result.archive.is_none());
    assert_matches!(
        result.report.categories[0].status,
        CategoryStatus::NoInputs
    );
    assert_matches!(result.into_archive(), Err(CadastreError::NoDataFound));
}

#[test]
fn scratch_directory_removed_after_run() {
    let src = tempfile::tempdir().unwrap();
    let fx = fixture(both_territories(src.path()));

    let request = RunRequest::new(vec![RIGA.to_string()], vec![Category::Parcel]);
    fx.app.run(&catalog(), &request, &JsonOutput).unwrap();

    let work = fx.temp.path().join("work");
    assert!(work.is_dir());
    assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
}

#[test]
fn catalog_served_from_cache_until_refresh() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let client = MockCatalog {
        entries: vec![entry(RIGA, "https://x/riga.zip")],
        ..MockCatalog::default()
    };
    let options = AppOptions {
        catalog_cache: CachePolicy::Ttl(Duration::from_secs(600)),
        work_dir: None,
    };
    let calls = client.calls.clone();
    let app = App::new(store, client, MockArchives::default(), options);
    let catalog_calls = || *calls.lock().unwrap();

    assert_eq!(app.load_catalog(false, &JsonOutput).len(), 1);
    assert_eq!(app.load_catalog(false, &JsonOutput).len(), 1);
    assert_eq!(catalog_calls(), 1);

    app.load_catalog(true, &JsonOutput);
    assert_eq!(catalog_calls(), 2);

    assert!(app.clear_cache(&JsonOutput).unwrap().cleared);
    app.load_catalog(false, &JsonOutput);
    assert_eq!(catalog_calls(), 3);
}

#[test]
fn catalog_failure_yields_empty_listing_error() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let client = MockCatalog {
        fail: true,
        ..MockCatalog::default()
    };
    let app = App::new(store, client, MockArchives::default(), AppOptions::default());

    assert!(app.load_catalog(false, &JsonOutput).is_empty());
    assert_matches!(app.list(false, &JsonOutput), Err(CadastreError::EmptyCatalog));
}

#[test]
fn listing_is_sorted_for_display() {
    let temp = tempfile::tempdir().unwrap();
    let store = temp_store(&temp);
    let client = MockCatalog {
        entries: vec![
            entry(JELGAVA, "https://x/jelgava.zip"),
            entry("Metadata", "https://x/meta.zip"),
            entry(RIGA, "https://x/riga.zip"),
        ],
        ..MockCatalog::default()
    };
    let app = App::new(store, client, MockArchives::default(), AppOptions::default());

    let listed = app.list(false, &JsonOutput).unwrap();
    let names: Vec<_> = listed
        .territories
        .iter()
        .map(|entry| entry.name.as_str())
        .collect();
    assert_eq!(names, vec![RIGA, JELGAVA, "Metadata"]);
    assert_eq!(listed.territories[0].url, "https://x/riga.zip");
}
