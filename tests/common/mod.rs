#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use shapefile::Point;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

pub const PROJECTION: &str = "PROJCS[\"LKS-92 / Latvia TM\"]";

/// Writes `<dir>/<base>.shp/.shx/.dbf` holding `count` points and one character field per name.
pub fn write_points(dir: &Path, base: &str, fields: &[&str], count: usize) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{base}.shp"));
    let mut table = TableWriterBuilder::new();
    for field in fields {
        table = table.add_character_field(FieldName::try_from(*field).unwrap(), 16);
    }
    let mut writer = shapefile::Writer::from_path(&path, table).unwrap();
    for idx in 0..count {
        let mut record = Record::default();
        for field in fields {
            record.insert(
                field.to_string(),
                FieldValue::Character(Some(format!("{base}-{idx}"))),
            );
        }
        writer
            .write_shape_and_record(&Point::new(idx as f64, idx as f64 * 2.0), &record)
            .unwrap();
    }
    drop(writer);
    path
}

/// Points shapefile with the standard parcel-like fields and a projection file.
pub fn write_parcels(dir: &Path, base: &str, count: usize) -> PathBuf {
    let path = write_points(dir, base, &["CODE", "GROUP"], count);
    fs::write(path.with_extension("prj"), PROJECTION).unwrap();
    path
}

/// Every file in `dir` whose stem is `base`, as `(entry prefix + file name, path)` pairs.
pub fn group_entries(dir: &Path, base: &str, prefix: &str) -> Vec<(String, PathBuf)> {
    let mut entries: Vec<(String, PathBuf)> = fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.file_stem().and_then(|stem| stem.to_str()) == Some(base))
        .map(|path| {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            (format!("{prefix}{name}"), path)
        })
        .collect();
    entries.sort();
    entries
}

pub fn zip_files(entries: &[(String, PathBuf)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, path) in entries {
        writer.start_file(name.as_str(), options).unwrap();
        writer.write_all(&fs::read(path).unwrap()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A territory package: `parcels` KKParcel records, a KKParcelPart layer and a KKBuilding layer.
pub fn territory_zip(dir: &Path, territory: &str, parcels: usize) -> Vec<u8> {
    let dir = dir.join(territory);
    write_parcels(&dir, "KKParcel", parcels);
    write_parcels(&dir, "KKParcelPart", 5);
    write_points(&dir, "KKBuilding", &["CODE", "FLOORS"], 2);

    let prefix = format!("{territory}/");
    let mut entries = group_entries(&dir, "KKParcel", &prefix);
    entries.extend(group_entries(&dir, "KKParcelPart", &prefix));
    entries.extend(group_entries(&dir, "KKBuilding", &prefix));
    zip_files(&entries)
}

pub fn entry_names(archive: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(archive)).unwrap();
    archive.file_names().map(str::to_string).collect()
}

/// Unpacks a flat archive into `dir`.
pub fn unpack(archive: &[u8], dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(archive)).unwrap();
    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx).unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        fs::write(dir.join(entry.name()), content).unwrap();
    }
}
