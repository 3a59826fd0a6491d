//! CSV export of projected glucose effects.

use crate::{GlucoseEffect, Result};
use std::fs::File;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    date: String,
    amount: f64,
    unit: String,
}

impl From<&GlucoseEffect> for CsvRow {
    fn from(effect: &GlucoseEffect) -> Self {
        CsvRow {
            date: effect.date.to_rfc3339(),
            amount: effect.quantity,
            unit: effect.unit.to_string(),
        }
    }
}

/// Write effects to `path` as `date,amount,unit` rows, replacing any existing file
///
/// The file is synced to disk before returning. Returns the number of rows written.
pub fn write_effects_csv(path: &Path, effects: &[GlucoseEffect]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(file);

    for effect in effects {
        writer.serialize(CsvRow::from(effect))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} effects to {:?}", effects.len(), path);
    Ok(effects.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlucoseUnit;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_write_effects_csv() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out").join("effects.csv");
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let effects: Vec<GlucoseEffect> = (0..3)
            .map(|i| GlucoseEffect {
                date: start + Duration::minutes(5 * i),
                quantity: 1.5 * i as f64,
                unit: GlucoseUnit::MilligramsPerDeciliter,
            })
            .collect();

        let count = write_effects_csv(&path, &effects).unwrap();
        assert_eq!(count, 3);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, vec!["date", "amount", "unit"]);

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[2][0], "2024-03-01T12:10:00+00:00");
        assert_eq!(&records[2][1], "3.0");
        assert_eq!(&records[2][2], "mg/dL");
    }

    #[test]
    fn test_write_replaces_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("effects.csv");
        std::fs::write(&path, "stale\n").unwrap();

        write_effects_csv(&path, &[]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("stale"));
    }
}
