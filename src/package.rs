use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::CadastreError;

/// Sidecar extensions bundled for each merged output, in archive order.
pub const PACKAGE_EXTENSIONS: [&str; 5] = ["shp", "shx", "dbf", "prj", "cpg"];

/// Zips `<work_dir>/<base>.<ext>` for every base name into a flat in-memory archive.
///
/// Missing extensions are omitted. Returns `None` when no file was found at all.
pub fn package(work_dir: &Path, base_names: &[String]) -> Result<Option<Vec<u8>>, CadastreError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut written = 0usize;

    for base in base_names {
        for ext in PACKAGE_EXTENSIONS {
            let entry_name = format!("{base}.{ext}");
            let path = work_dir.join(&entry_name);
            if !path.is_file() {
                continue;
            }
            let mut file =
                File::open(&path).map_err(|err| CadastreError::Filesystem(err.to_string()))?;
            writer
                .start_file(entry_name, options)
                .map_err(|err| CadastreError::Archive(err.to_string()))?;
            io::copy(&mut file, &mut writer)
                .map_err(|err| CadastreError::Filesystem(err.to_string()))?;
            written += 1;
        }
    }

    let cursor = writer
        .finish()
        .map_err(|err| CadastreError::Archive(err.to_string()))?;
    if written == 0 {
        return Ok(None);
    }
    Ok(Some(cursor.into_inner()))
}
