use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CadastreError;

/// Sort key for labels that do not start with `<digits>.`; sorts after every numbered label.
pub const UNNUMBERED_SORT_KEY: u64 = u64::MAX;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Parcel,
    Building,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Parcel, Category::Building];

    pub fn predicate(self) -> CategoryPredicate {
        match self {
            Category::Parcel => CategoryPredicate::new("KKParcel", "KKParcelPart"),
            Category::Building => CategoryPredicate::new("KKBuilding", "KKBuildingPart"),
        }
    }

    /// Base name (without extension) of the merged output file set.
    pub fn output_base_name(self) -> &'static str {
        match self {
            Category::Parcel => "Parcels_merged",
            Category::Building => "Buildings_merged",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Parcel => "Land parcels",
            Category::Building => "Buildings",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Parcel => write!(f, "parcel"),
            Category::Building => write!(f, "building"),
        }
    }
}

impl FromStr for Category {
    type Err = CadastreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "parcel" | "parcels" | "kkparcel" => Ok(Category::Parcel),
            "building" | "buildings" | "kkbuilding" => Ok(Category::Building),
            _ => Err(CadastreError::InvalidCategory(value.to_string())),
        }
    }
}

/// Substring rule selecting the archive entries of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPredicate {
    include: &'static str,
    exclude: &'static str,
}

impl CategoryPredicate {
    pub const fn new(include: &'static str, exclude: &'static str) -> Self {
        Self { include, exclude }
    }

    pub fn include(&self) -> &'static str {
        self.include
    }

    pub fn exclude(&self) -> &'static str {
        self.exclude
    }

    pub fn matches(&self, entry_name: &str) -> bool {
        entry_name.contains(self.include) && !entry_name.contains(self.exclude)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    pub url: String,
    pub format: String,
}

/// A `.shp` pulled out of a territory archive together with its same-named siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFileGroup {
    pub category: Category,
    pub primary_path: PathBuf,
    pub sibling_paths: BTreeSet<PathBuf>,
}

/// Presentation order key: `"12. Name"` sorts by 12, anything else goes last.
pub fn sort_key(label: &str) -> u64 {
    let head = label.split('.').next().unwrap_or_default();
    if head.is_empty() || !head.chars().all(|ch| ch.is_ascii_digit()) {
        return UNNUMBERED_SORT_KEY;
    }
    head.parse().unwrap_or(UNNUMBERED_SORT_KEY)
}

/// Collapses repeated categories, keeping first-occurrence order.
pub fn dedup_categories(categories: &[Category]) -> Vec<Category> {
    let mut seen = Vec::with_capacity(categories.len());
    for category in categories {
        if !seen.contains(category) {
            seen.push(*category);
        }
    }
    seen
}
