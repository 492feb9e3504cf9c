use crate::dataset::TrainingRecord;
use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, info};

/// Load instruction records from a JSONL file.
///
/// Blank lines are skipped. The first line that does not parse as a record
/// aborts the load; nothing is returned in that case.
pub fn load_training_data(path: &Path) -> TrainingResult<Vec<TrainingRecord>> {
    let file = std::fs::File::open(path).map_err(|e| {
        TrainingError::Dataset(format!("failed to open {}: {}", path.display(), e))
    })?;
    let records = read_training_data(BufReader::new(file))?;

    info!(path = %path.display(), count = records.len(), "Loaded training records");
    Ok(records)
}

/// Reader-based variant of [`load_training_data`].
pub fn read_training_data<R: BufRead>(reader: R) -> TrainingResult<Vec<TrainingRecord>> {
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            debug!(line = idx + 1, "Skipping blank line");
            continue;
        }
        let record: TrainingRecord = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse jsonl line {}: {}", idx + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Write rows as JSON lines, one object per line.
pub fn write_jsonl<T: Serialize>(path: &Path, rows: &[T]) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
