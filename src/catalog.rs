use std::collections::BTreeMap;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{HttpSettings, ResolvedConfig};
use crate::domain::{ResourceEntry, sort_key};
use crate::error::CadastreError;

pub trait CatalogClient: Send + Sync {
    fn fetch_catalog(&self) -> Result<Catalog, CadastreError>;

    /// Identity of the remote catalog, used to key the on-disk cache.
    fn source(&self) -> String;
}

/// Territory name to archive URL. A repeated name keeps the last URL seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeMap<String, String>,
}

impl Catalog {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = ResourceEntry>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.name, entry.url))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in presentation order: numbered labels by number, the rest last.
    pub fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort_by_key(|name| sort_key(name));
        names
    }
}

#[derive(Debug, Deserialize)]
pub struct CkanResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<CkanPackage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CkanPackage {
    #[serde(default)]
    pub resources: Vec<CkanResource>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CkanResource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Keeps SHP/ZIP resources (or any `.zip` URL) that carry both a name and a URL.
pub fn filter_resources(resources: Vec<CkanResource>) -> Vec<ResourceEntry> {
    resources
        .into_iter()
        .filter_map(|resource| {
            let format = resource.format.unwrap_or_default();
            let url = resource.url.unwrap_or_default();
            let upper = format.to_ascii_uppercase();
            let is_archive = upper == "SHP"
                || upper == "ZIP"
                || url.to_ascii_lowercase().ends_with(".zip");
            if !is_archive {
                return None;
            }
            let name = resource.name.filter(|name| !name.is_empty())?;
            if url.is_empty() {
                return None;
            }
            Some(ResourceEntry { name, url, format })
        })
        .collect()
}

pub fn parse_catalog(body: &str) -> Result<Catalog, CadastreError> {
    let response: CkanResponse =
        serde_json::from_str(body).map_err(|err| CadastreError::CatalogParse(err.to_string()))?;
    if !response.success {
        return Err(CadastreError::CatalogRejected);
    }
    let resources = response
        .result
        .map(|package| package.resources)
        .unwrap_or_default();
    Ok(Catalog::from_entries(filter_resources(resources)))
}

#[derive(Clone)]
pub struct CkanHttpClient {
    client: Client,
    base_url: String,
    dataset_id: String,
}

impl CkanHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CadastreError> {
        let client = build_client(&config.catalog_http)
            .map_err(|err| CadastreError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.catalog_url.clone(),
            dataset_id: config.dataset_id.clone(),
        })
    }
}

impl CatalogClient for CkanHttpClient {
    fn fetch_catalog(&self) -> Result<Catalog, CadastreError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("id", self.dataset_id.as_str())])
            .send()
            .map_err(|err| CadastreError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(CadastreError::CatalogStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| CadastreError::CatalogHttp(err.to_string()))?;
        parse_catalog(&body)
    }

    fn source(&self) -> String {
        format!("{}?id={}", self.base_url, self.dataset_id)
    }
}

/// Blocking client with the crate user agent, shared by catalog and archive fetches.
pub(crate) fn build_client(settings: &HttpSettings) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(format!("cadastre-merge/{}", env!("CARGO_PKG_VERSION")))
        .timeout(settings.timeout)
        .danger_accept_invalid_certs(settings.accept_invalid_certs)
        .build()
}
