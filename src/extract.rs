use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::domain::{Category, ExtractedFileGroup, dedup_categories};
use crate::error::CadastreError;

pub type CategoryFiles = BTreeMap<Category, Vec<ExtractedFileGroup>>;

/// Extracts every `.shp` group of the requested categories from an in-memory zip.
///
/// A group is the `.shp` entry plus all entries sharing its base name (path
/// minus the final extension). Groups are returned per category in archive
/// order; entries matching no category stay in the archive.
pub fn extract_categories(
    archive_bytes: &[u8],
    categories: &[Category],
    target_dir: &Path,
) -> Result<CategoryFiles, CadastreError> {
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|err| CadastreError::Archive(err.to_string()))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let categories = dedup_categories(categories);

    let mut extracted: HashMap<String, PathBuf> = HashMap::new();
    let mut found = CategoryFiles::new();

    for name in &names {
        if is_dir_entry(name) || !has_extension(name, "shp") {
            continue;
        }
        for category in &categories {
            if !category.predicate().matches(name) {
                continue;
            }
            let base = base_name(name);
            let mut primary_path = None;
            let mut sibling_paths = BTreeSet::new();
            for member in names
                .iter()
                .filter(|other| !is_dir_entry(other) && base_name(other) == base)
            {
                let path = match extracted.get(member) {
                    Some(path) => path.clone(),
                    None => {
                        let path = extract_entry(&mut archive, member, target_dir)?;
                        extracted.insert(member.clone(), path.clone());
                        path
                    }
                };
                if member == name {
                    primary_path = Some(path);
                } else {
                    sibling_paths.insert(path);
                }
            }
            let Some(primary_path) = primary_path else {
                continue;
            };
            debug!(entry = %name, %category, "matched archive entry");
            found.entry(*category).or_default().push(ExtractedFileGroup {
                category: *category,
                primary_path,
                sibling_paths,
            });
        }
    }

    Ok(found)
}

/// Appends `more` to `into`, preserving per-category order.
pub fn append_category_files(into: &mut CategoryFiles, more: CategoryFiles) {
    for (category, groups) in more {
        into.entry(category).or_default().extend(groups);
    }
}

fn extract_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
    target_dir: &Path,
) -> Result<PathBuf, CadastreError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|err| CadastreError::Archive(err.to_string()))?;
    let entry_path = match entry.enclosed_name() {
        Some(path) => target_dir.join(path),
        None => {
            return Err(CadastreError::Archive(format!(
                "zip entry path traversal detected: {name}"
            )));
        }
    };
    if let Some(parent) = entry_path.parent() {
        fs::create_dir_all(parent).map_err(|err| CadastreError::Filesystem(err.to_string()))?;
    }
    let mut outfile =
        fs::File::create(&entry_path).map_err(|err| CadastreError::Filesystem(err.to_string()))?;
    io::copy(&mut entry, &mut outfile).map_err(|err| CadastreError::Archive(err.to_string()))?;
    Ok(entry_path)
}

fn is_dir_entry(name: &str) -> bool {
    name.ends_with('/')
}

/// Entry name minus its final extension; dots in parent directories are left alone.
fn base_name(name: &str) -> &str {
    let file_start = name.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    match name[file_start..].rfind('.') {
        Some(dot) => &name[..file_start + dot],
        None => name,
    }
}

fn has_extension(name: &str, ext: &str) -> bool {
    let base = base_name(name);
    base.len() < name.len() && name[base.len() + 1..].eq_ignore_ascii_case(ext)
}
