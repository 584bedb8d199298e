//! Concatenating same-category shapefiles into one output file set.
//!
//! The output table copies the field definitions of the canonical input: the
//! first path that opens and has at least one attribute field. Inputs whose
//! field names or types differ from the canonical ones are skipped whole;
//! records are never reshaped to fit. Text longer than the canonical field
//! length is truncated by the dbase writer.

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;
use shapefile::dbase::{self, FieldInfo, Record, TableWriterBuilder};
use shapefile::{Shape, Writer};
use tracing::{debug, info, warn};

use crate::error::CadastreError;

/// Encoding the dbase writer emits attribute text in.
const OUTPUT_ENCODING: &str = "UTF-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: String,
    pub length: u8,
}

impl From<&FieldInfo> for FieldDescriptor {
    fn from(info: &FieldInfo) -> Self {
        Self {
            name: info.name().to_string(),
            field_type: format!("{:?}", info.field_type()),
            length: info.length(),
        }
    }
}

/// Attribute fields of a shapefile, in table order, without the deletion marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ShapefileSchema {
    fields: Vec<FieldDescriptor>,
}

impl ShapefileSchema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Same field count, and every field present by name with the same type.
    ///
    /// Records are written by field name, so a name mismatch would leave
    /// columns empty even when the counts agree. Lengths may differ.
    pub fn is_compatible(&self, other: &ShapefileSchema) -> bool {
        self.len() == other.len()
            && self.fields.iter().all(|field| {
                other.fields.iter().any(|theirs| {
                    theirs.name == field.name && theirs.field_type == field.field_type
                })
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedInput {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub output: PathBuf,
    pub schema: ShapefileSchema,
    pub inputs_merged: usize,
    pub records_written: usize,
    /// Records dropped because their geometry was null.
    pub null_geometries: usize,
    pub skipped: Vec<SkippedInput>,
}

/// Reads the attribute schema from the `.dbf` next to `shp_path`.
pub fn read_schema(shp_path: &Path) -> Result<ShapefileSchema, CadastreError> {
    let reader = open_table(shp_path)?;
    Ok(schema_of(&reader))
}

/// Counts the (geometry, record) pairs of a shapefile.
pub fn count_records(shp_path: &Path) -> Result<usize, CadastreError> {
    let mut reader = shapefile::Reader::from_path(shp_path)
        .map_err(|err| CadastreError::Shapefile(format!("{}: {err}", shp_path.display())))?;
    let mut count = 0usize;
    for item in reader.iter_shapes_and_records() {
        item.map_err(|err| CadastreError::Shapefile(format!("{}: {err}", shp_path.display())))?;
        count += 1;
    }
    Ok(count)
}

/// Merges `inputs` (in order) into `output`, which must name the `.shp` to create.
pub fn merge_shapefiles(inputs: &[PathBuf], output: &Path) -> Result<MergeReport, CadastreError> {
    if inputs.is_empty() {
        return Err(CadastreError::NoInputs(output.to_path_buf()));
    }

    let Some((canonical_path, schema, table)) = find_canonical(inputs) else {
        warn!(output = %output.display(), "no valid input for this output");
        return Err(CadastreError::NoValidInput(output.to_path_buf()));
    };
    debug!(source = %canonical_path.display(), fields = schema.len(), "canonical schema");

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent).map_err(|err| CadastreError::Filesystem(err.to_string()))?;
    }
    let mut writer = Writer::from_path(output, table)
        .map_err(|err| CadastreError::Shapefile(format!("{}: {err}", output.display())))?;

    let mut report = MergeReport {
        output: output.to_path_buf(),
        schema,
        inputs_merged: 0,
        records_written: 0,
        null_geometries: 0,
        skipped: Vec::new(),
    };

    for path in inputs {
        match append_input(&mut writer, path, &report.schema) {
            Ok(appended) => {
                report.inputs_merged += 1;
                report.records_written += appended.records;
                report.null_geometries += appended.null_geometries;
                if let Some(reason) = appended.stopped {
                    warn!(path = %path.display(), %reason, "input only partially merged");
                    report.skipped.push(SkippedInput {
                        path: path.clone(),
                        reason,
                    });
                }
            }
            Err(AppendError::Skipped(reason)) => {
                warn!(path = %path.display(), %reason, "skipping input");
                report.skipped.push(SkippedInput {
                    path: path.clone(),
                    reason,
                });
            }
            Err(AppendError::Corrupted(reason)) => {
                drop(writer);
                discard_output(output);
                warn!(path = %path.display(), %reason, "output discarded");
                return Err(CadastreError::Shapefile(format!("{}: {reason}", path.display())));
            }
        }
    }

    // Dropping the writer finalises the .shp/.shx headers and the .dbf record count.
    drop(writer);

    copy_projection(&inputs[0], output);
    fs::write(output.with_extension("cpg"), OUTPUT_ENCODING)
        .map_err(|err| CadastreError::Filesystem(err.to_string()))?;

    info!(
        output = %output.display(),
        inputs = report.inputs_merged,
        records = report.records_written,
        skipped = report.skipped.len(),
        "merged shapefiles"
    );
    Ok(report)
}

struct Appended {
    records: usize,
    null_geometries: usize,
    stopped: Option<String>,
}

enum AppendError {
    /// Nothing from the input reached the output.
    Skipped(String),
    /// A pair was only partly written; the output files are out of step.
    Corrupted(String),
}

fn find_canonical(inputs: &[PathBuf]) -> Option<(PathBuf, ShapefileSchema, TableWriterBuilder)> {
    for path in inputs {
        if let Err(err) = shapefile::Reader::from_path(path) {
            debug!(path = %path.display(), %err, "cannot open candidate");
            continue;
        }
        let table = match open_table(path) {
            Ok(table) => table,
            Err(err) => {
                debug!(path = %path.display(), %err, "cannot open candidate table");
                continue;
            }
        };
        let schema = schema_of(&table);
        if schema.is_empty() {
            debug!(path = %path.display(), "candidate has no attribute fields");
            continue;
        }
        return Some((path.clone(), schema, TableWriterBuilder::from_reader(table)));
    }
    None
}

fn append_input(
    writer: &mut Writer<BufWriter<File>>,
    path: &Path,
    canonical: &ShapefileSchema,
) -> Result<Appended, AppendError> {
    let schema = read_schema(path).map_err(|err| AppendError::Skipped(err.to_string()))?;
    if !canonical.is_compatible(&schema) {
        return Err(AppendError::Skipped(format!(
            "schema mismatch: {} fields, expected {} with matching names and types",
            schema.len(),
            canonical.len()
        )));
    }
    let mut reader = shapefile::Reader::from_path(path)
        .map_err(|err| AppendError::Skipped(err.to_string()))?;

    let mut appended = Appended {
        records: 0,
        null_geometries: 0,
        stopped: None,
    };
    for item in reader.iter_shapes_and_records() {
        let (shape, record) = match item {
            Ok(pair) => pair,
            Err(err) => {
                appended.stopped = Some(format!(
                    "read error after {} records: {err}",
                    appended.records
                ));
                break;
            }
        };
        match write_shape(writer, &shape, &record) {
            Ok(true) => appended.records += 1,
            Ok(false) => appended.null_geometries += 1,
            Err(err) => {
                return Err(AppendError::Corrupted(format!(
                    "write error after {} records: {err}",
                    appended.records
                )));
            }
        }
    }
    if appended.null_geometries > 0 {
        warn!(
            path = %path.display(),
            null_geometries = appended.null_geometries,
            "null geometries are not written"
        );
    }
    Ok(appended)
}

/// Writes one pair; returns `false` for null geometries, which carry no shape type.
fn write_shape(
    writer: &mut Writer<BufWriter<File>>,
    shape: &Shape,
    record: &Record,
) -> Result<bool, shapefile::Error> {
    match shape {
        Shape::Point(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::PointM(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::PointZ(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::Polyline(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::PolylineM(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::PolylineZ(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::Polygon(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::PolygonM(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::PolygonZ(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::Multipoint(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::MultipointM(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::MultipointZ(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::Multipatch(geometry) => writer.write_shape_and_record(geometry, record)?,
        Shape::NullShape => return Ok(false),
    }
    Ok(true)
}

fn open_table(shp_path: &Path) -> Result<dbase::Reader<std::io::BufReader<File>>, CadastreError> {
    let dbf_path = shp_path.with_extension("dbf");
    dbase::Reader::from_path(&dbf_path)
        .map_err(|err| CadastreError::Shapefile(format!("{}: {err}", dbf_path.display())))
}

fn schema_of<R: std::io::Read + std::io::Seek>(table: &dbase::Reader<R>) -> ShapefileSchema {
    ShapefileSchema::new(table.fields().iter().map(FieldDescriptor::from).collect())
}

fn discard_output(output: &Path) {
    for ext in ["shp", "shx", "dbf"] {
        let path = output.with_extension(ext);
        if path.exists()
            && let Err(err) = fs::remove_file(&path)
        {
            warn!(path = %path.display(), %err, "failed to remove partial output");
        }
    }
}

/// Copies the `.prj` beside `first_input` (any extension case) next to `output`.
fn copy_projection(first_input: &Path, output: &Path) {
    let Some(source) = sibling_with_extension(first_input, "prj") else {
        return;
    };
    if let Err(err) = fs::copy(&source, output.with_extension("prj")) {
        warn!(path = %source.display(), %err, "failed to copy projection");
    }
}

fn sibling_with_extension(path: &Path, ext: &str) -> Option<PathBuf> {
    let exact = path.with_extension(ext);
    if exact.is_file() {
        return Some(exact);
    }
    let stem = path.file_stem()?;
    let dir = path.parent()?;
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|candidate| {
            candidate.file_stem() == Some(stem)
                && candidate
                    .extension()
                    .and_then(|value| value.to_str())
                    .map(|value| value.eq_ignore_ascii_case(ext))
                    .unwrap_or(false)
        })
}
