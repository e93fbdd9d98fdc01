use csv::StringRecord;

use crate::domain::{GlobalCaseRecord, SourceId};
use crate::error::DataError;
use crate::normalize::{malformed, missing_column};
use crate::parse::{parse_count, parse_date, parse_measure};

const FEED: SourceId = SourceId::Global;

pub const EXCLUDED_LOCATION: &str = "International";
pub const DEFAULT_CONTINENT: &str = "Global";

/// Index of each column the relation is built from.
struct Columns {
    iso_code: usize,
    continent: usize,
    location: usize,
    date: usize,
    total_cases: usize,
    new_cases: usize,
    total_deaths: usize,
    new_deaths: usize,
    new_tests: usize,
    total_tests: usize,
    tests_per_case: usize,
    positive_rate: usize,
    population: usize,
    population_density: usize,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, DataError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim() == name)
                .ok_or_else(|| missing_column(FEED, name))
        };
        Ok(Self {
            iso_code: find("iso_code")?,
            continent: find("continent")?,
            location: find("location")?,
            date: find("date")?,
            total_cases: find("total_cases")?,
            new_cases: find("new_cases")?,
            total_deaths: find("total_deaths")?,
            new_deaths: find("new_deaths")?,
            new_tests: find("new_tests")?,
            total_tests: find("total_tests")?,
            tests_per_case: find("tests_per_case")?,
            positive_rate: find("positive_rate")?,
            population: find("population")?,
            population_density: find("population_density")?,
        })
    }
}

/// Normalizes the global case-count CSV, keeping input row order.
pub fn normalize(raw: &[u8]) -> Result<Vec<GlobalCaseRecord>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(raw);
    let headers = reader
        .headers()
        .map_err(|err| malformed(FEED, err.to_string()))?
        .clone();
    let columns = Columns::locate(&headers)?;

    let mut records = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|err| malformed(FEED, err.to_string()))?;
        // Header is line 1.
        let line = idx + 2;
        let field = |col: usize| row.get(col).unwrap_or("").trim();
        let count = |col: usize| {
            parse_count(field(col)).map_err(|message| malformed(FEED, format!("line {line}: {message}")))
        };
        let measure = |col: usize| {
            parse_measure(field(col))
                .map_err(|message| malformed(FEED, format!("line {line}: {message}")))
        };

        let country = field(columns.location);
        if country == EXCLUDED_LOCATION {
            continue;
        }
        let continent = match field(columns.continent) {
            "" => DEFAULT_CONTINENT,
            value => value,
        };
        let date = parse_date(field(columns.date), &["%Y-%m-%d"])
            .map_err(|message| malformed(FEED, format!("line {line}: {message}")))?;

        records.push(GlobalCaseRecord {
            iso_code: field(columns.iso_code).to_string(),
            continent: continent.to_string(),
            country: country.to_string(),
            date,
            total_cases: count(columns.total_cases)?,
            new_cases: count(columns.new_cases)?,
            total_deaths: count(columns.total_deaths)?,
            new_deaths: count(columns.new_deaths)?,
            new_tests: count(columns.new_tests)?,
            total_tests: count(columns.total_tests)?,
            tests_per_case: measure(columns.tests_per_case)?,
            positive_rate: measure(columns.positive_rate)?,
            population: count(columns.population)?,
            population_density: measure(columns.population_density)?,
        });
    }

    tracing::debug!(rows = records.len(), "normalized global feed");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;

    const HEADER: &str = "iso_code,continent,location,date,total_cases,new_cases,\
new_cases_smoothed,total_deaths,new_deaths,new_tests,total_tests,tests_per_case,\
positive_rate,population,population_density,median_age";

    fn csv(rows: &[&str]) -> Vec<u8> {
        let mut text = String::from(HEADER);
        for row in rows {
            text.push('\n');
            text.push_str(row);
        }
        text.into_bytes()
    }

    #[test]
    fn drops_international_and_fills_missing_values() {
        let raw = csv(&[
            "IND,Asia,India,2021-01-01,100.0,10.0,9.5,2.0,1.0,,500.0,5.0,0.2,1380004385.0,450.419,28.2",
            "OWID_INT,,International,2021-01-01,5.0,0.0,,,,,,,,,,",
        ]);

        let records = normalize(&raw).unwrap();
        assert_eq!(records.len(), 1);
        let india = &records[0];
        assert_eq!(india.country, "India");
        assert_eq!(india.date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(india.total_cases, 100);
        assert_eq!(india.new_tests, 0);
        assert_eq!(india.total_tests, 500);
        assert_eq!(india.population, 1_380_004_385);
        assert!((india.population_density - 450.419).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_continent_defaults_to_global() {
        let raw = csv(&["OWID_WRL,,World,2020-03-01,88000,1800,,3000,60,,,,,7794798729,58.045,30.9"]);
        let records = normalize(&raw).unwrap();
        assert_eq!(records[0].continent, "Global");
        assert_eq!(records[0].tests_per_case, 0.0);
    }

    #[test]
    fn keeps_input_order_and_is_deterministic() {
        let raw = csv(&[
            "FRA,Europe,France,2020-03-02,191,61,,3,1,,,,,65273512,122.578,42",
            "AFG,Asia,Afghanistan,2020-03-01,1,0,,0,0,,,,,38928341,54.422,18.6",
            "FRA,Europe,France,2020-03-01,130,30,,2,0,,,,,65273512,122.578,42",
        ]);
        let first = normalize(&raw).unwrap();
        let second = normalize(&raw).unwrap();
        assert_eq!(first, second);
        let countries: Vec<_> = first.iter().map(|r| r.country.as_str()).collect();
        assert_eq!(countries, ["France", "Afghanistan", "France"]);
    }

    #[test]
    fn missing_column_is_an_error() {
        let raw = b"iso_code,continent,location,date\nIND,Asia,India,2021-01-01\n";
        let err = normalize(raw).unwrap_err();
        assert_matches!(err, DataError::MissingColumn { feed: SourceId::Global, column } if column == "total_cases");
    }

    #[test]
    fn bad_number_is_an_error() {
        let raw = csv(&["IND,Asia,India,2021-01-01,lots,10,,2,1,,500,5,0.2,1,1,1"]);
        let err = normalize(&raw).unwrap_err();
        assert_matches!(err, DataError::Malformed { message, .. } if message.contains("line 2"));
    }
}
