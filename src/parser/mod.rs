use chrono::{Datelike, NaiveDate};
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{all_consuming, map, map_res, opt},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueryError, Result};

/// A calendar date used to address one column of the case table.
///
/// The table names its columns `M/D/YY` (no padding, two-digit year); the
/// key keeps the full date so day-before arithmetic crosses month and year
/// boundaries correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateKey(NaiveDate);

impl DateKey {
    /// Builds a key from 1-indexed calendar values. Impossible dates
    /// (e.g. 31 February) fail with `UnknownDate`.
    pub fn new(day: u32, month: u32, year: i32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(DateKey)
            .ok_or_else(|| QueryError::UnknownDate(format!("{}/{}/{}", month, day, year)))
    }

    pub fn from_date(date: NaiveDate) -> Self {
        DateKey(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Column header for this date, e.g. `3/7/20`.
    pub fn column_name(&self) -> String {
        format!(
            "{}/{}/{:02}",
            self.0.month(),
            self.0.day(),
            self.0.year().rem_euclid(100)
        )
    }

    /// The calendar day immediately before this one.
    pub fn previous(&self) -> Option<DateKey> {
        self.0.pred_opt().map(DateKey)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_name())
    }
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse::<u32>)(input)
}

fn header_date(input: &str) -> IResult<&str, (u32, u32, u32)> {
    tuple((
        number,
        preceded(char('/'), number),
        preceded(char('/'), number),
    ))(input)
}

/// Parses a `M/D/YY` column header. Two-digit years are read as `20YY`.
/// Returns `None` for headers that are not dates (`Lat`, `Country/Region`, ...).
pub fn parse_date_header(input: &str) -> Option<DateKey> {
    let (_, (month, day, year)) = all_consuming(header_date)(input.trim()).ok()?;
    let year = if year < 100 { 2000 + year as i32 } else { year as i32 };
    DateKey::new(day, month, year).ok()
}

/// A parsed text query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    /// `CASES 'Poland' ON 2020-03-07`
    Cases { country: String, date: DateKey },
    /// `TOTAL 'China' ON 2020-03-12`
    Total { country: String, date: DateKey },
    /// `TOP 5 ON 2020-02-27`
    Top { k: Option<usize>, date: DateKey },
    /// `CHANGED ON 2020-03-03`
    Changed { date: DateKey },
}

/// Parses one query, e.g. `TOP 5 ON 2020-02-27`. Keywords are
/// case-insensitive, dates are ISO `YYYY-MM-DD`.
pub fn parse_query(input: &str) -> Result<Query> {
    all_consuming(delimited(
        multispace0,
        alt((cases_query, total_query, top_query, changed_query)),
        multispace0,
    ))(input)
    .map(|(_, query)| query)
    .map_err(|e| QueryError::InvalidQuery(format!("{}: {}", input.trim(), e)))
}

fn cases_query(input: &str) -> IResult<&str, Query> {
    let (input, _) = terminated(tag_no_case("CASES"), multispace1)(input)?;
    let (input, country) = quoted(input)?;
    let (input, date) = on_date(input)?;

    Ok((input, Query::Cases {
        country: country.to_string(),
        date,
    }))
}

fn total_query(input: &str) -> IResult<&str, Query> {
    let (input, _) = terminated(tag_no_case("TOTAL"), multispace1)(input)?;
    let (input, country) = quoted(input)?;
    let (input, date) = on_date(input)?;

    Ok((input, Query::Total {
        country: country.to_string(),
        date,
    }))
}

fn top_query(input: &str) -> IResult<&str, Query> {
    let (input, _) = tag_no_case("TOP")(input)?;
    let (input, k) = opt(preceded(
        multispace1,
        map_res(digit1, str::parse::<usize>),
    ))(input)?;
    let (input, date) = on_date(input)?;

    Ok((input, Query::Top { k, date }))
}

fn changed_query(input: &str) -> IResult<&str, Query> {
    let (input, _) = tag_no_case("CHANGED")(input)?;
    map(on_date, |date| Query::Changed { date })(input)
}

// Country names may contain commas ("Korea, South") and apostrophes
// ("Cote d'Ivoire"), so both quote styles are accepted.
fn quoted(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while1(|c: char| c != '\''), char('\'')),
        delimited(char('"'), take_while1(|c: char| c != '"'), char('"')),
    ))(input)
}

fn on_date(input: &str) -> IResult<&str, DateKey> {
    preceded(
        tuple((multispace1, tag_no_case("ON"), multispace1)),
        iso_date,
    )(input)
}

fn iso_date(input: &str) -> IResult<&str, DateKey> {
    map_res(
        tuple((
            map_res(digit1, str::parse::<i32>),
            preceded(char('-'), number),
            preceded(char('-'), number),
        )),
        |(year, month, day)| DateKey::new(day, month, year),
    )(input)
}
