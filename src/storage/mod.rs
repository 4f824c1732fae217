use arrow::{
    array::{AsArray, Int64Array, StringArray},
    compute::concat_batches,
    csv::ReaderBuilder,
    datatypes::{DataType, Field, Int64Type, Schema},
    record_batch::RecordBatch,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{QueryError, Result};
use crate::parser::{parse_date_header, DateKey};

pub const PROVINCE_COLUMN: &str = "Province/State";
pub const COUNTRY_COLUMN: &str = "Country/Region";
pub const LAT_COLUMN: &str = "Lat";
pub const LONG_COLUMN: &str = "Long";

/// Confirmed cases time series published by CSSE at Johns Hopkins University.
pub const DEFAULT_SOURCE_URL: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/archived_data/archived_time_series/time_series_19-covid-Confirmed_archived_0325.csv";

/// Immutable table of cumulative confirmed cases backed by one Arrow batch.
///
/// One row per region (or sub-region), the fixed identifying columns, and one
/// `Int64` column per published date. Date columns are indexed by calendar
/// date so a lookup for an unpublished date fails instead of panicking.
#[derive(Debug, Clone)]
pub struct CaseTable {
    batch: RecordBatch,
    countries: StringArray,
    cases: BTreeMap<DateKey, Int64Array>,
}

impl CaseTable {
    pub fn from_batch(batch: RecordBatch) -> Result<Self> {
        let schema = batch.schema();

        let country_idx = schema.index_of(COUNTRY_COLUMN).map_err(|_| {
            QueryError::MalformedSource(format!("missing '{}' column", COUNTRY_COLUMN))
        })?;
        let countries = batch
            .column(country_idx)
            .as_string_opt::<i32>()
            .ok_or_else(|| {
                QueryError::MalformedSource(format!("'{}' is not a string column", COUNTRY_COLUMN))
            })?
            .clone();

        let mut cases = BTreeMap::new();
        for (idx, field) in schema.fields().iter().enumerate() {
            let Some(date) = parse_date_header(field.name()) else {
                continue;
            };
            let column = batch
                .column(idx)
                .as_primitive_opt::<Int64Type>()
                .ok_or_else(|| {
                    QueryError::MalformedSource(format!(
                        "date column '{}' has type {}",
                        field.name(),
                        field.data_type()
                    ))
                })?;
            if cases.insert(date, column.clone()).is_some() {
                return Err(QueryError::MalformedSource(format!(
                    "more than one column for date {}",
                    date
                )));
            }
        }

        if cases.is_empty() {
            return Err(QueryError::MalformedSource("no date columns".to_string()));
        }

        Ok(Self {
            batch,
            countries,
            cases,
        })
    }

    /// Parses the comma-separated source: a header row followed by one row per
    /// region. Column types come from the header names, not from inference.
    ///
    /// Rows whose field count differs from the header are skipped with a
    /// warning; the remaining rows still load.
    pub fn from_csv(data: &[u8]) -> Result<Self> {
        let mut records = csv::ReaderBuilder::new().flexible(true).from_reader(data);
        let header = records.headers()?.clone();
        if header.is_empty() {
            return Err(QueryError::MalformedSource("empty header row".to_string()));
        }

        let schema = Arc::new(Schema::new(
            header.iter().map(column_field).collect::<Vec<_>>(),
        ));

        let mut kept = csv::Writer::from_writer(Vec::with_capacity(data.len()));
        kept.write_record(&header)?;
        for record in records.byte_records() {
            let record = record?;
            if record.len() != header.len() {
                warn!(
                    line = record.position().map(|p| p.line()),
                    fields = record.len(),
                    expected = header.len(),
                    "Skipping row with wrong number of fields"
                );
                continue;
            }
            kept.write_byte_record(&record)?;
        }
        let kept = kept
            .into_inner()
            .map_err(|e| QueryError::MalformedSource(e.to_string()))?;

        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .build(Cursor::new(kept))?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;
        debug!(
            rows = batch.num_rows(),
            columns = batch.num_columns(),
            "Parsed case table"
        );

        Self::from_batch(batch)
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn countries(&self) -> &StringArray {
        &self.countries
    }

    /// The case counts of every row on `date`.
    pub fn cases_at(&self, date: DateKey) -> Result<&Int64Array> {
        self.cases
            .get(&date)
            .ok_or_else(|| QueryError::UnknownDate(date.column_name()))
    }

    /// Published dates in calendar order.
    pub fn dates(&self) -> impl Iterator<Item = DateKey> + '_ {
        self.cases.keys().copied()
    }

    pub fn first_date(&self) -> Option<DateKey> {
        self.cases.keys().next().copied()
    }

    pub fn last_date(&self) -> Option<DateKey> {
        self.cases.keys().next_back().copied()
    }
}

fn column_field(name: &str) -> Field {
    match name {
        COUNTRY_COLUMN => Field::new(name, DataType::Utf8, false),
        LAT_COLUMN | LONG_COLUMN => Field::new(name, DataType::Float64, true),
        _ if parse_date_header(name).is_some() => Field::new(name, DataType::Int64, true),
        _ => Field::new(name, DataType::Utf8, true),
    }
}

/// Produces the case table once at startup.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn load(&self) -> Result<CaseTable>;

    /// Where the table comes from, for logs.
    fn describe(&self) -> String;
}

/// Fetches the CSV over HTTP. No retries: a failed fetch is reported as is.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl TableSource for HttpSource {
    async fn load(&self) -> Result<CaseTable> {
        info!("Fetching case table from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| QueryError::SourceUnavailable(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| QueryError::SourceUnavailable(e.to_string()))?;

        CaseTable::from_csv(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reads the CSV from a local file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TableSource for FileSource {
    async fn load(&self) -> Result<CaseTable> {
        info!("Reading case table from {}", self.path.display());

        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            QueryError::SourceUnavailable(format!("{}: {}", self.path.display(), e))
        })?;

        CaseTable::from_csv(&data)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Picks the source for a location: `http(s)://` URLs are fetched, anything
/// else is read as a file path.
pub fn source_for(location: &str) -> Box<dyn TableSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new(location))
    } else {
        Box::new(FileSource::new(location))
    }
}
