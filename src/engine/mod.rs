use arrow::{
    array::{Array, AsArray, BooleanArray, StringArray},
    compute::{
        filter,
        kernels::cmp::{distinct, eq},
    },
    datatypes::Int64Type,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::parser::{DateKey, Query};
use crate::storage::CaseTable;

pub const DEFAULT_YEAR: i32 = 2020;
pub const DEFAULT_K: usize = 5;

/// Result of a dispatched text query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutput {
    Cases(i64),
    Countries(Vec<String>),
    Count(usize),
}

/// Read-only queries over a loaded case table.
///
/// The engine owns nothing but a shared handle to the table; cloning it is
/// cheap and every query is a pure function of the table and its arguments.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    table: Arc<CaseTable>,
}

impl QueryEngine {
    pub fn new(table: CaseTable) -> Self {
        Self::from_shared(Arc::new(table))
    }

    pub fn from_shared(table: Arc<CaseTable>) -> Self {
        Self { table }
    }

    pub fn get_table(&self) -> Arc<CaseTable> {
        self.table.clone()
    }

    /// Confirmed cases of the single row named `country` on the given date.
    ///
    /// Countries reported per sub-region have several rows and fail with
    /// `AmbiguousRegion`; use [`QueryEngine::total_cases_on_date`] for those.
    pub fn cases_on_date(&self, country: &str, day: u32, month: u32, year: i32) -> Result<i64> {
        let date = DateKey::new(day, month, year)?;
        let cases = self.table.cases_at(date)?;

        let mask = self.country_mask(country)?;
        let row = match mask.true_count() {
            0 => return Err(QueryError::UnknownRegion(country.to_string())),
            1 => mask
                .values()
                .set_indices()
                .next()
                .ok_or_else(|| QueryError::UnknownRegion(country.to_string()))?,
            rows => {
                return Err(QueryError::AmbiguousRegion {
                    region: country.to_string(),
                    rows,
                })
            }
        };

        if cases.is_null(row) {
            return Err(QueryError::MalformedSource(format!(
                "no value for '{}' on {}",
                country, date
            )));
        }
        Ok(cases.value(row))
    }

    /// Confirmed cases summed over every row of `country` on the given date.
    pub fn total_cases_on_date(
        &self,
        country: &str,
        day: u32,
        month: u32,
        year: i32,
    ) -> Result<i64> {
        let date = DateKey::new(day, month, year)?;
        let cases = self.table.cases_at(date)?;

        let mask = self.country_mask(country)?;
        if mask.true_count() == 0 {
            return Err(QueryError::UnknownRegion(country.to_string()));
        }

        let matched = filter(cases, &mask)?;
        let matched = matched.as_primitive_opt::<Int64Type>().ok_or_else(|| {
            QueryError::MalformedSource(format!("date column {} is not Int64", date))
        })?;
        arrow_arith::aggregate::sum(matched).ok_or_else(|| {
            QueryError::MalformedSource(format!("no values for '{}' on {}", country, date))
        })
    }

    /// Names of the `k` countries with the most confirmed cases on the given
    /// date, summing sub-region rows per country.
    ///
    /// Countries with equal totals are ordered by name, ascending.
    pub fn top_k_countries_by_date(
        &self,
        day: u32,
        month: u32,
        year: i32,
        k: usize,
    ) -> Result<Vec<String>> {
        let date = DateKey::new(day, month, year)?;
        let totals = self.country_totals(date)?;

        let mut ranked: Vec<(&str, i64)> = totals.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(country, _)| country.to_string())
            .collect())
    }

    /// Number of rows (not countries) whose count on the given date differs
    /// from the count on the calendar day before.
    pub fn changed_count_by_date(&self, day: u32, month: u32, year: i32) -> Result<usize> {
        let date = DateKey::new(day, month, year)?;
        let previous = date
            .previous()
            .ok_or_else(|| QueryError::UnknownDate(format!("day before {}", date)))?;

        let today = self.table.cases_at(date)?;
        let yesterday = self.table.cases_at(previous)?;

        // IS DISTINCT FROM: a row empty on both days counts as unchanged,
        // unlike a NaN != NaN comparison which would count it.
        Ok(distinct(yesterday, today)?.true_count())
    }

    pub fn execute(&self, query: &Query) -> Result<QueryOutput> {
        debug!(?query, "Executing query");

        match query {
            Query::Cases { country, date } => {
                let (day, month, year) = parts(date);
                self.cases_on_date(country, day, month, year)
                    .map(QueryOutput::Cases)
            }
            Query::Total { country, date } => {
                let (day, month, year) = parts(date);
                self.total_cases_on_date(country, day, month, year)
                    .map(QueryOutput::Cases)
            }
            Query::Top { k, date } => {
                let (day, month, year) = parts(date);
                self.top_k_countries_by_date(day, month, year, k.unwrap_or(DEFAULT_K))
                    .map(QueryOutput::Countries)
            }
            Query::Changed { date } => {
                let (day, month, year) = parts(date);
                self.changed_count_by_date(day, month, year)
                    .map(QueryOutput::Count)
            }
        }
    }

    fn country_mask(&self, country: &str) -> Result<BooleanArray> {
        Ok(eq(self.table.countries(), &StringArray::new_scalar(country))?)
    }

    // Null cells are skipped, so a country's total covers its reported rows.
    fn country_totals(&self, date: DateKey) -> Result<BTreeMap<&str, i64>> {
        let cases = self.table.cases_at(date)?;

        let mut totals = BTreeMap::new();
        for (country, count) in self.table.countries().iter().zip(cases.iter()) {
            if let Some(country) = country {
                *totals.entry(country).or_insert(0) += count.unwrap_or(0);
            }
        }
        Ok(totals)
    }
}

fn parts(date: &DateKey) -> (u32, u32, i32) {
    use chrono::Datelike;

    let date = date.date();
    (date.day(), date.month(), date.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two adjacent-year columns plus a two-row country.
    const CSV: &str = "\
Province/State,Country/Region,Lat,Long,12/30/20,12/31/20,1/1/21
Quebec,Canada,52.9,-73.5,100,120,120
Ontario,Canada,51.2,-85.3,200,200,250
,Chile,-35.6,-71.5,50,50,50
,Peru,-9.1,-75.0,70,80,80
";

    fn engine() -> QueryEngine {
        QueryEngine::new(CaseTable::from_csv(CSV.as_bytes()).unwrap())
    }

    #[test]
    fn test_cases_on_date() {
        let engine = engine();
        assert_eq!(engine.cases_on_date("Peru", 31, 12, 2020), Ok(80));
        assert_eq!(engine.cases_on_date("Chile", 1, 1, 2021), Ok(50));
    }

    #[test]
    fn test_cases_on_date_multi_row_country() {
        assert_eq!(
            engine().cases_on_date("Canada", 31, 12, 2020),
            Err(QueryError::AmbiguousRegion {
                region: "Canada".to_string(),
                rows: 2,
            })
        );
    }

    #[test]
    fn test_total_cases_on_date() {
        let engine = engine();
        assert_eq!(engine.total_cases_on_date("Canada", 1, 1, 2021), Ok(370));
        assert_eq!(engine.total_cases_on_date("Peru", 1, 1, 2021), Ok(80));
        assert!(matches!(
            engine.total_cases_on_date("peru", 1, 1, 2021),
            Err(QueryError::UnknownRegion(_))
        ));
    }

    #[test]
    fn test_changed_count_across_year_boundary() {
        // Quebec and Peru change on 12/31/20, only Ontario on 1/1/21.
        let engine = engine();
        assert_eq!(engine.changed_count_by_date(31, 12, 2020), Ok(2));
        assert_eq!(engine.changed_count_by_date(1, 1, 2021), Ok(1));
    }

    #[test]
    fn test_changed_count_before_first_column() {
        assert_eq!(
            engine().changed_count_by_date(30, 12, 2020),
            Err(QueryError::UnknownDate("12/29/20".to_string()))
        );
    }

    #[test]
    fn test_changed_count_with_empty_cells() {
        // Chile is empty on both days, Peru gains its first value.
        let csv = "\
Province/State,Country/Region,Lat,Long,3/1/20,3/2/20
,Chile,-35.6,-71.5,,
,Peru,-9.1,-75.0,,4
,Bolivia,-16.3,-63.6,1,1
";
        let engine = QueryEngine::new(CaseTable::from_csv(csv.as_bytes()).unwrap());
        assert_eq!(engine.changed_count_by_date(2, 3, 2020), Ok(1));
    }

    #[test]
    fn test_top_k_aggregates_sub_regions() {
        assert_eq!(
            engine().top_k_countries_by_date(30, 12, 2020, 2),
            Ok(vec!["Canada".to_string(), "Peru".to_string()])
        );
    }

    #[test]
    fn test_execute() {
        let engine = engine();
        let date = DateKey::new(1, 1, 2021).unwrap();

        assert_eq!(
            engine.execute(&Query::Total {
                country: "Canada".to_string(),
                date,
            }),
            Ok(QueryOutput::Cases(370))
        );
        assert_eq!(
            engine.execute(&Query::Changed { date }),
            Ok(QueryOutput::Count(1))
        );
        assert_eq!(
            engine.execute(&Query::Top { k: None, date }),
            Ok(QueryOutput::Countries(vec![
                "Canada".to_string(),
                "Peru".to_string(),
                "Chile".to_string(),
            ]))
        );
    }

    #[test]
    fn test_output_json() {
        assert_eq!(
            serde_json::to_value(QueryOutput::Count(35)).unwrap(),
            serde_json::json!({ "count": 35 })
        );
    }
}
