use reqwest::blocking::Client;

use crate::catalog::build_client;
use crate::config::ResolvedConfig;
use crate::error::CadastreError;

pub trait ArchiveClient: Send + Sync {
    /// Downloads the whole archive behind `url` into memory.
    fn download(&self, url: &str) -> Result<Vec<u8>, CadastreError>;
}

#[derive(Clone)]
pub struct ArchiveHttpClient {
    client: Client,
}

impl ArchiveHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CadastreError> {
        let client = build_client(&config.download_http)
            .map_err(|err| CadastreError::DownloadHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArchiveClient for ArchiveHttpClient {
    fn download(&self, url: &str) -> Result<Vec<u8>, CadastreError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CadastreError::DownloadHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "download failed".to_string());
            return Err(CadastreError::DownloadStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| CadastreError::DownloadHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
