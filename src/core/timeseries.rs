use crate::config::ReferenceConfig;
use crate::core::gap_fill::rolling_mean;
use crate::core::query::Query;
use crate::io::reference::ReferenceSeries;
use crate::types::{No2Result, TimeSeries};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One row of the aligned table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub timestamp: DateTime<Utc>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub moving_average: Option<f64>,
    pub smooth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<f64>,
}

/// Date-indexed table with Mean, Max, MovingAverage, Smooth and optional Local columns.
/// Timestamps are unique and increasing; missing cells are `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlignedTimeSeriesTable {
    rows: Vec<TableRow>,
    has_local: bool,
}

impl AlignedTimeSeriesTable {
    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_local(&self) -> bool {
        self.has_local
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.rows.iter().map(|r| r.timestamp).collect()
    }

    pub fn row(&self, timestamp: &DateTime<Utc>) -> Option<&TableRow> {
        self.rows
            .binary_search_by_key(timestamp, |r| r.timestamp)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Column names in output order
    pub fn columns(&self) -> Vec<&'static str> {
        let mut cols = vec!["Mean", "Max", "MovingAverage", "Smooth"];
        if self.has_local {
            cols.push("Local");
        }
        cols
    }

    /// Values of a column by name, aligned with `rows()`
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let pick: fn(&TableRow) -> Option<f64> = match name {
            "Mean" => |r| r.mean,
            "Max" => |r| r.max,
            "MovingAverage" => |r| r.moving_average,
            "Smooth" => |r| r.smooth,
            "Local" if self.has_local => |r| r.local,
            _ => return None,
        };
        Some(self.rows.iter().map(pick).collect())
    }

    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> No2Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        let mut header = vec!["date"];
        header.extend(self.columns());
        writer.write_record(&header)?;

        let cell = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        for row in &self.rows {
            let mut record = vec![
                row.timestamp.to_rfc3339(),
                cell(row.mean),
                cell(row.max),
                cell(row.moving_average),
                cell(row.smooth),
            ];
            if self.has_local {
                record.push(cell(row.local));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        log::info!("Wrote {} rows to {}", self.rows.len(), path.as_ref().display());
        Ok(())
    }

    pub fn to_json(&self) -> No2Result<String> {
        Ok(serde_json::to_string(&self.rows)?)
    }
}

/// Merges independently retrieved series into one aligned table
pub struct TimeSeriesAssembler {
    series_window: usize,
}

impl TimeSeriesAssembler {
    /// `series_window` is the length of the rolling mean behind the Smooth column
    pub fn new(series_window: usize) -> Self {
        Self { series_window }
    }

    /// Full outer join over timestamps, then the Smooth column
    pub fn assemble(
        &self,
        mean: &TimeSeries,
        max: &TimeSeries,
        moving_average: &TimeSeries,
    ) -> AlignedTimeSeriesTable {
        let mut joined: BTreeMap<DateTime<Utc>, [Option<f64>; 3]> = BTreeMap::new();
        for (col, series) in [mean, max, moving_average].into_iter().enumerate() {
            for p in series.points() {
                joined.entry(p.timestamp).or_insert([None; 3])[col] = p.value;
            }
        }

        let mut rows: Vec<TableRow> = joined
            .into_iter()
            .map(|(timestamp, [mean, max, ma])| TableRow {
                timestamp,
                mean,
                max,
                moving_average: ma,
                smooth: None,
                local: None,
            })
            .collect();

        let mean_col: Vec<f64> = rows.iter().map(|r| r.mean.unwrap_or(f64::NAN)).collect();
        let smooth = rolling_mean(&mean_col, self.series_window);
        for (row, s) in rows.iter_mut().zip(smooth) {
            row.smooth = s.is_finite().then_some(s);
        }

        log::info!(
            "Assembled {} rows from series of length {}/{}/{}",
            rows.len(),
            mean.len(),
            max.len(),
            moving_average.len()
        );

        AlignedTimeSeriesTable { rows, has_local: false }
    }

    /// Left-join the reference series by calendar date if the query lies inside
    /// the reference coverage; otherwise the table is returned without Local column.
    pub fn attach_reference(
        &self,
        mut table: AlignedTimeSeriesTable,
        query: &Query,
        cfg: &ReferenceConfig,
        reference: &ReferenceSeries,
    ) -> AlignedTimeSeriesTable {
        if !Self::covers(query, cfg) {
            log::debug!("Query outside reference coverage, no Local column");
            return table;
        }
        for row in table.rows.iter_mut() {
            row.local = reference.get(row.timestamp.date_naive());
        }
        table.has_local = true;
        table
    }

    pub fn covers(query: &Query, cfg: &ReferenceConfig) -> bool {
        cfg.coverage.contains(query.bbox()) && cfg.coverage_window().contains_extent(query.window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeSeriesPoint;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 7, day, 0, 0, 0).unwrap()
    }

    fn series(points: &[(u32, Option<f64>)]) -> TimeSeries {
        TimeSeries::from_points(
            points
                .iter()
                .map(|&(d, value)| TimeSeriesPoint { timestamp: ts(d), value })
                .collect(),
        )
    }

    #[test]
    fn test_full_outer_join() {
        let a = series(&[(1, Some(1.0)), (2, Some(2.0))]);
        let b = series(&[(2, Some(20.0)), (3, Some(30.0))]);
        let table = TimeSeriesAssembler::new(1).assemble(&a, &b, &TimeSeries::default());

        assert_eq!(table.timestamps(), vec![ts(1), ts(2), ts(3)]);
        assert_eq!(table.column("Mean").unwrap(), vec![Some(1.0), Some(2.0), None]);
        assert_eq!(table.column("Max").unwrap(), vec![None, Some(20.0), Some(30.0)]);
        assert_eq!(table.column("MovingAverage").unwrap(), vec![None, None, None]);
        assert!(table.column("Local").is_none());
    }

    #[test]
    fn test_smooth_column_rolls_over_mean() {
        let mean = series(&[(1, Some(1.0)), (2, Some(3.0)), (3, None), (4, Some(7.0))]);
        let table = TimeSeriesAssembler::new(3).assemble(&mean, &mean, &mean);
        let smooth = table.column("Smooth").unwrap();
        assert_eq!(smooth, vec![Some(2.0), Some(2.0), Some(5.0), Some(7.0)]);
    }
}
