use crate::config::BackendConfig;
use crate::types::{BoundingBox, No2Error, No2Result, TemporalExtent};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Immutable, validated request descriptor shared by every feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QueryFields")]
pub struct Query {
    bbox: BoundingBox,
    window: TemporalExtent,
    cloud_threshold: f32,
    collection: String,
    no2_band: String,
    cloud_band: String,
}

impl Query {
    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn window(&self) -> &TemporalExtent {
        &self.window
    }

    pub fn cloud_threshold(&self) -> f32 {
        self.cloud_threshold
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn no2_band(&self) -> &str {
        &self.no2_band
    }

    pub fn cloud_band(&self) -> &str {
        &self.cloud_band
    }

    pub fn bands(&self) -> [&str; 2] {
        [&self.no2_band, &self.cloud_band]
    }

    /// Fails with `DateOutOfRange` unless `date` lies in the query window
    pub fn check_date(&self, date: NaiveDate) -> No2Result<()> {
        if self.window.contains(date) {
            Ok(())
        } else {
            Err(No2Error::DateOutOfRange {
                date,
                window_start: self.window.start,
                window_end: self.window.end,
            })
        }
    }
}

/// Serialized form of a `Query`; deserializing goes through `QueryBuilder::build`
#[derive(Deserialize)]
struct QueryFields {
    bbox: BoundingBox,
    window: TemporalExtent,
    cloud_threshold: f32,
    collection: String,
    no2_band: String,
    cloud_band: String,
}

impl TryFrom<QueryFields> for Query {
    type Error = No2Error;

    fn try_from(fields: QueryFields) -> No2Result<Self> {
        let mut builder = QueryBuilder::new()
            .bbox(fields.bbox.west, fields.bbox.south, fields.bbox.east, fields.bbox.north)
            .dates(fields.window.start, fields.window.end)
            .cloud_threshold(fields.cloud_threshold)
            .collection(&fields.collection);
        builder.no2_band = fields.no2_band;
        builder.cloud_band = fields.cloud_band;
        builder.build()
    }
}

/// Builder turning raw UI inputs into a `Query`
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    bbox: Option<(f64, f64, f64, f64)>,
    dates: Option<(NaiveDate, NaiveDate)>,
    date_error: Option<String>,
    cloud_threshold: f32,
    collection: String,
    no2_band: String,
    cloud_band: String,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::from_backend(&BackendConfig::default())
    }

    /// Start from the collection and band names of a backend configuration
    pub fn from_backend(backend: &BackendConfig) -> Self {
        Self {
            bbox: None,
            dates: None,
            date_error: None,
            cloud_threshold: 0.5,
            collection: backend.collection.clone(),
            no2_band: backend.no2_band.clone(),
            cloud_band: backend.cloud_band.clone(),
        }
    }

    pub fn bbox(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.bbox = Some((west, south, east, north));
        self
    }

    pub fn dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.dates = Some((start, end));
        self
    }

    /// ISO `YYYY-MM-DD` dates as delivered by date pickers
    pub fn dates_str(mut self, start: &str, end: &str) -> Self {
        let parse = |s: &str| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d");
        match (parse(start), parse(end)) {
            (Ok(a), Ok(b)) => self.dates = Some((a, b)),
            _ => self.date_error = Some(format!("unparseable date range '{}'..'{}'", start, end)),
        }
        self
    }

    pub fn cloud_threshold(mut self, threshold: f32) -> Self {
        self.cloud_threshold = threshold;
        self
    }

    pub fn collection(mut self, collection: &str) -> Self {
        self.collection = collection.to_string();
        self
    }

    pub fn build(self) -> No2Result<Query> {
        if let Some(msg) = self.date_error {
            return Err(No2Error::InvalidQuery(msg));
        }
        let (w, s, e, n) = self
            .bbox
            .ok_or_else(|| No2Error::InvalidQuery("bounding box not set".to_string()))?;
        let bbox = BoundingBox::new(w, s, e, n)?;

        let (start, end) = self
            .dates
            .ok_or_else(|| No2Error::InvalidQuery("date range not set".to_string()))?;
        let window = TemporalExtent::new(start, end)?;

        if !(0.0..=1.0).contains(&self.cloud_threshold) {
            return Err(No2Error::InvalidQuery(format!(
                "cloud threshold {} is outside [0, 1]",
                self.cloud_threshold
            )));
        }

        log::debug!(
            "Built query: bbox={:?} window={}..{} cloud<{}",
            bbox,
            window.start,
            window.end,
            self.cloud_threshold
        );

        Ok(Query {
            bbox,
            window,
            cloud_threshold: self.cloud_threshold,
            collection: self.collection,
            no2_band: self.no2_band,
            cloud_band: self.cloud_band,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_builder() -> QueryBuilder {
        QueryBuilder::new()
            .bbox(10.35, 46.10, 12.55, 47.13)
            .dates_str("2019-01-01", "2019-12-31")
    }

    #[test]
    fn test_build_valid_query() {
        let query = default_builder().cloud_threshold(0.3).build().unwrap();
        assert_eq!(query.cloud_threshold(), 0.3);
        assert_eq!(query.bands(), ["NO2", "CLOUD_FRACTION"]);
        assert_eq!(query.window().start.to_string(), "2019-01-01");
    }

    #[test]
    fn test_rejects_threshold_out_of_range() {
        for t in [-0.1, 1.5, f32::NAN] {
            let result = default_builder().cloud_threshold(t).build();
            assert!(matches!(result, Err(No2Error::InvalidQuery(_))), "threshold {}", t);
        }
    }

    #[test]
    fn test_rejects_inverted_dates() {
        let result = default_builder().dates_str("2019-12-31", "2019-01-01").build();
        assert!(matches!(result, Err(No2Error::InvalidQuery(_))));
        let result = default_builder().dates_str("2019-13-01", "2019-12-31").build();
        assert!(matches!(result, Err(No2Error::InvalidQuery(_))));
    }

    #[test]
    fn test_check_date() {
        let query = default_builder().build().unwrap();
        assert!(query.check_date(NaiveDate::from_ymd_opt(2019, 7, 1).unwrap()).is_ok());
        let err = query
            .check_date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
            .unwrap_err();
        assert!(matches!(err, No2Error::DateOutOfRange { .. }));
    }

    #[test]
    fn test_deserialized_query_is_validated() {
        let query = default_builder().cloud_threshold(0.3).build().unwrap();
        let json = serde_json::to_value(&query).unwrap();
        let back: Query = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back, query);

        let mut inverted = json.clone();
        inverted["bbox"]["west"] = serde_json::json!(20.0);
        assert!(serde_json::from_value::<Query>(inverted).is_err());

        let mut cloudy = json;
        cloudy["cloud_threshold"] = serde_json::json!(3.0);
        let err = serde_json::from_value::<Query>(cloudy).unwrap_err();
        assert!(err.to_string().contains("cloud threshold"));
    }
}
