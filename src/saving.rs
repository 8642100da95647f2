use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::store::Database;

/// Write a gzip-compressed bincode snapshot of the database
///
/// The snapshot is written and synced next to the target, then renamed
/// over it, so a crash mid-write leaves the previous snapshot intact.
pub fn save_database(db: &Database, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    let result = write_snapshot(db, &tmp).and_then(|()| std::fs::rename(&tmp, path));
    if result.is_err() && tmp.is_file() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_snapshot(db: &Database, tmp: &Path) -> std::io::Result<()> {
    let file = File::create(tmp)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = std::io::BufWriter::new(encoder);

    serialize_into(&mut writer, db)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    let mut file = encoder.finish()?;
    file.flush()?;
    file.sync_all()
}

/// Read a snapshot written by [`save_database`]
///
/// A missing file is not an error: it yields an empty database.
pub fn load_database(path: &Path) -> std::io::Result<Database> {
    if !path.exists() {
        return Ok(Database::default());
    }

    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    let db: Database = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(db)
}
