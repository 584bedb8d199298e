use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CadastreError {
    #[error("invalid data category: {0}")]
    InvalidCategory(String),

    #[error("please select at least one territory")]
    NoTerritoriesSelected,

    #[error("please select at least one data type (parcels or buildings)")]
    NoCategoriesSelected,

    #[error("territory not found in catalog: {0}")]
    UnknownTerritory(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("failed to parse catalog response: {0}")]
    CatalogParse(String),

    #[error("catalog reported an unsuccessful response")]
    CatalogRejected,

    #[error("no downloadable territories available in the catalog")]
    EmptyCatalog,

    #[error("download failed: {0}")]
    DownloadHttp(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("invalid archive: {0}")]
    Archive(String),

    #[error("shapefile error: {0}")]
    Shapefile(String),

    #[error("no input files for {}", .0.display())]
    NoInputs(PathBuf),

    #[error("no valid input for {}", .0.display())]
    NoValidInput(PathBuf),

    #[error("no data found for the selected criteria")]
    NoDataFound,

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
