use crate::config::ReferenceConfig;
use crate::types::{No2Error, No2Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// Daily ground-station reference values, keyed by calendar date
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceSeries {
    values: BTreeMap<NaiveDate, f64>,
}

impl ReferenceSeries {
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.values.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.values.keys().next().copied()
    }
}

/// One sheet row reduced to its numeric readings
struct RowCells {
    readings: Vec<f64>,
    /// Any non-empty cell, numeric or not
    has_content: bool,
}

impl RowCells {
    fn from_csv(record: &csv::StringRecord) -> Self {
        Self {
            readings: record.iter().filter_map(|cell| cell.parse::<f64>().ok()).collect(),
            has_content: record.iter().any(|cell| !cell.is_empty()),
        }
    }

    fn from_workbook(row: &[Data]) -> Self {
        let mut readings = Vec::new();
        let mut has_content = false;
        for cell in row {
            match cell {
                Data::Float(v) => readings.push(*v),
                Data::Int(v) => readings.push(*v as f64),
                Data::String(text) => {
                    if let Ok(v) = text.trim().parse::<f64>() {
                        readings.push(v);
                    }
                }
                Data::Empty => continue,
                _ => {}
            }
            has_content = true;
        }
        Self { readings, has_content }
    }
}

/// Workbook formats read through calamine; anything else is parsed as CSV
const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Reader for the station export: one row per day starting at a fixed date,
/// each column one sensor reading
pub struct ReferenceReader;

impl ReferenceReader {
    /// Excel or ODS workbooks (first sheet) by extension, CSV otherwise
    pub fn read<P: AsRef<Path>>(path: P, cfg: &ReferenceConfig) -> No2Result<ReferenceSeries> {
        let path = path.as_ref();
        log::info!("Reading reference dataset {}", path.display());

        let is_workbook = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| WORKBOOK_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_workbook {
            return Self::read_workbook(path, cfg.start_date, cfg.scale);
        }

        let file = std::fs::File::open(path).map_err(|e| {
            No2Error::ArtifactIo(format!("cannot open reference {}: {}", path.display(), e))
        })?;
        Self::from_reader(file, cfg.start_date, cfg.scale)
    }

    /// First worksheet of a workbook; rows count from the sheet's first used row
    pub fn read_workbook(path: &Path, start: NaiveDate, scale: f64) -> No2Result<ReferenceSeries> {
        let open_error =
            |e: calamine::Error| No2Error::ArtifactIo(format!("cannot read workbook {}: {}", path.display(), e));
        let mut workbook = open_workbook_auto(path).map_err(open_error)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| No2Error::ArtifactIo(format!("{} has no worksheet", path.display())))?
            .map_err(open_error)?;

        Self::from_rows(range.rows().map(|row| Ok(RowCells::from_workbook(row))), start, scale)
    }

    /// CSV text in the same layout as the workbook sheet
    pub fn from_reader<R: Read>(reader: R, start: NaiveDate, scale: f64) -> No2Result<ReferenceSeries> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let rows = csv
            .records()
            .map(|record| -> No2Result<RowCells> { Ok(RowCells::from_csv(&record?)) });
        Self::from_rows(rows, start, scale)
    }

    /// Row `i` is dated `start + i days`; its value is the mean of the row's
    /// numeric cells times `scale`. Rows without numeric cells are skipped but
    /// still advance the date. A header row (no numeric cells on the first
    /// line) is ignored.
    fn from_rows<I>(rows: I, start: NaiveDate, scale: f64) -> No2Result<ReferenceSeries>
    where
        I: Iterator<Item = No2Result<RowCells>>,
    {
        let mut values = BTreeMap::new();
        let mut day: i64 = 0;
        for (line, row) in rows.enumerate() {
            let row = row?;
            let readings: Vec<f64> = row.readings.into_iter().filter(|v| v.is_finite()).collect();

            if line == 0 && readings.is_empty() && row.has_content {
                continue;
            }

            if !readings.is_empty() {
                let mean = readings.iter().sum::<f64>() / readings.len() as f64;
                values.insert(start + Duration::days(day), mean * scale);
            }
            day += 1;
        }

        log::debug!("Reference dataset has {} dated values", values.len());
        Ok(ReferenceSeries { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_mean_scaled_and_dated() {
        let text = "station_a,station_b\n10,30\n20,\n";
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let series = ReferenceReader::from_reader(text.as_bytes(), start, 0.1).unwrap();

        assert_eq!(series.len(), 2);
        assert!((series.get(start).unwrap() - 2.0).abs() < 1e-12);
        let second = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap();
        assert!((series.get(second).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_missing_row_advances_date() {
        let text = "1,1\n-,-\n3,3\n";
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let series = ReferenceReader::from_reader(text.as_bytes(), start, 1.0).unwrap();
        assert_eq!(series.get(NaiveDate::from_ymd_opt(2019, 1, 2).unwrap()), None);
        assert_eq!(series.get(NaiveDate::from_ymd_opt(2019, 1, 3).unwrap()), Some(3.0));
    }

    #[test]
    fn test_workbook_rows_follow_csv_rules() {
        let rows = vec![
            vec![Data::String("station_a".into()), Data::String("station_b".into())],
            vec![Data::Float(10.0), Data::Int(30)],
            vec![Data::Empty, Data::String("n/a".into())],
            vec![Data::String("40".into()), Data::Empty],
        ];
        let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
        let series = ReferenceReader::from_rows(
            rows.iter().map(|row| Ok(RowCells::from_workbook(row))),
            start,
            0.1,
        )
        .unwrap();

        assert_eq!(series.len(), 2);
        assert!((series.get(start).unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(series.get(NaiveDate::from_ymd_opt(2019, 1, 2).unwrap()), None);
        assert!((series.get(NaiveDate::from_ymd_opt(2019, 1, 3).unwrap()).unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_unreadable_workbook_is_artifact_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.xlsx");
        std::fs::write(&path, "not a zip archive").unwrap();
        let cfg = ReferenceConfig::default();
        let err = ReferenceReader::read(&path, &cfg).unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::ArtifactIo);
        assert!(err.to_string().contains("workbook"));
    }
}
