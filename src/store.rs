// src/store.rs
//
// Flat tabular storage: one serde-serialized record per line (JSONL).
// Builders read their inputs and write their artifacts through this module;
// sidecar files carry the staleness tokens next to each artifact.

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Reads a whole table. Returns `Ok(None)` when the file does not exist:
/// a missing input is a normal "not available" condition for the builders,
/// not an error.
///
/// Malformed lines are skipped with a warning; a table with bad rows still
/// yields its good rows.
pub fn read_table<T: DeserializeOwned>(path: &Path) -> io::Result<Option<Vec<T>>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    let mut malformed = 0usize;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(row) => rows.push(row),
            Err(_) => malformed += 1,
        }
    }

    if malformed > 0 {
        warn!(
            "{}: skipped {} malformed line(s)",
            path.display(),
            malformed
        );
    }
    Ok(Some(rows))
}

/// Writes a whole table, replacing any previous file.
pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for row in rows {
        let json = serde_json::to_string(row)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{}", json)?;
    }
    writer.flush()
}

/// Reads a one-value sidecar (fingerprint or high-water mark).
/// Any failure reads as "no recorded value".
pub fn read_sidecar(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        Err(_) => None,
    }
}

/// Writes a one-value sidecar.
pub fn write_sidecar(path: &Path, value: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, value)
}
