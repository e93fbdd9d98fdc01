use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::domain::{IndiaDailyRecord, SourceId};
use crate::error::DataError;
use crate::normalize::{malformed, missing_column};
use crate::parse::{json_text, parse_count, parse_date};
use crate::reference::StateCodeMap;

const FEED: SourceId = SourceId::IndiaDaily;
const DATE_FORMATS: &[&str] = &["%d-%b-%y", "%Y-%m-%d"];
const NON_STATE_KEYS: &[&str] = &["date", "dateymd", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Confirmed,
    Deceased,
    Recovered,
}

impl Status {
    fn parse(raw: &str) -> Result<Self, DataError> {
        match raw.trim().to_lowercase().as_str() {
            "confirmed" => Ok(Status::Confirmed),
            "deceased" => Ok(Status::Deceased),
            "recovered" => Ok(Status::Recovered),
            other => Err(malformed(FEED, format!("unknown status `{other}`"))),
        }
    }
}

/// One cell of the wide feed: a single status value for one state on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observation {
    date: NaiveDate,
    code: String,
    status: Status,
    value: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    confirmed: i64,
    deceased: i64,
    recovered: i64,
}

impl Counts {
    fn add(&mut self, status: Status, value: i64) -> Option<()> {
        let slot = match status {
            Status::Confirmed => &mut self.confirmed,
            Status::Deceased => &mut self.deceased,
            Status::Recovered => &mut self.recovered,
        };
        *slot = slot.checked_add(value)?;
        Some(())
    }

    fn merge(&mut self, other: Counts) -> Option<()> {
        self.confirmed = self.confirmed.checked_add(other.confirmed)?;
        self.deceased = self.deceased.checked_add(other.deceased)?;
        self.recovered = self.recovered.checked_add(other.recovered)?;
        Some(())
    }
}

fn overflow(state: &str, date: NaiveDate) -> DataError {
    malformed(FEED, format!("{state} on {date}: count overflows"))
}

/// Normalizes the per-state daily feed into `india_daily` rows ordered by
/// state then date, with running totals per state.
///
/// Accepts the upstream shape, `{"states_daily": [{"date": "14-Mar-20",
/// "status": "Confirmed", "dl": "5", ...}, ...]}`, and a nested
/// `{"2020-04-01": {"confirmed": {"dl": "5"}}}` shape.
pub fn normalize(raw: &[u8], state_codes: &StateCodeMap) -> Result<Vec<IndiaDailyRecord>, DataError> {
    let document: Value =
        serde_json::from_slice(raw).map_err(|err| malformed(FEED, err.to_string()))?;
    let observations = melt(&document)?;
    let by_code = pivot(observations)?;
    let by_state = resolve(by_code, state_codes)?;
    let records = accumulate(by_state)?;
    tracing::debug!(rows = records.len(), "normalized india daily feed");
    Ok(records)
}

fn melt(document: &Value) -> Result<Vec<Observation>, DataError> {
    let root = document
        .as_object()
        .ok_or_else(|| malformed(FEED, "expected a JSON object"))?;
    match root.get("states_daily") {
        Some(Value::Array(rows)) => {
            let mut observations = Vec::new();
            for row in rows {
                observations.extend(melt_row(row)?);
            }
            Ok(observations)
        }
        Some(_) => Err(malformed(FEED, "`states_daily` is not an array")),
        None => melt_nested(root),
    }
}

fn melt_row(row: &Value) -> Result<Vec<Observation>, DataError> {
    let row = row
        .as_object()
        .ok_or_else(|| malformed(FEED, "`states_daily` entry is not an object"))?;
    let status = row
        .get("status")
        .map(json_text)
        .ok_or_else(|| missing_column(FEED, "status"))?;
    let status = Status::parse(&status)?;
    let date = row
        .get("date")
        .map(json_text)
        .ok_or_else(|| missing_column(FEED, "date"))?;
    let date = parse_date(&date, DATE_FORMATS).map_err(|message| malformed(FEED, message))?;

    row.iter()
        .filter(|(key, _)| !NON_STATE_KEYS.contains(&key.as_str()))
        .map(|(code, value)| observation(date, code, status, value))
        .collect()
}

fn melt_nested(root: &Map<String, Value>) -> Result<Vec<Observation>, DataError> {
    let mut observations = Vec::new();
    for (date, statuses) in root {
        let date = parse_date(date, DATE_FORMATS).map_err(|message| malformed(FEED, message))?;
        let statuses = statuses
            .as_object()
            .ok_or_else(|| malformed(FEED, format!("entry for {date} is not an object")))?;
        for (status, states) in statuses {
            let status = Status::parse(status)?;
            let states = states
                .as_object()
                .ok_or_else(|| malformed(FEED, format!("{date} {status:?} is not an object")))?;
            for (code, value) in states {
                observations.push(observation(date, code, status, value)?);
            }
        }
    }
    Ok(observations)
}

fn observation(
    date: NaiveDate,
    code: &str,
    status: Status,
    value: &Value,
) -> Result<Observation, DataError> {
    let value = parse_count(&json_text(value))
        .map_err(|message| malformed(FEED, format!("{date} {code}: {message}")))?;
    Ok(Observation {
        date,
        code: code.trim().to_lowercase(),
        status,
        value,
    })
}

/// Status becomes a column; repeated (code, date, status) cells are summed.
fn pivot(
    observations: Vec<Observation>,
) -> Result<BTreeMap<(String, NaiveDate), Counts>, DataError> {
    let mut table = BTreeMap::<(String, NaiveDate), Counts>::new();
    for obs in observations {
        let (code, date) = (obs.code, obs.date);
        table
            .entry((code.clone(), date))
            .or_default()
            .add(obs.status, obs.value)
            .ok_or_else(|| overflow(&code, date))?;
    }
    Ok(table)
}

fn resolve(
    by_code: BTreeMap<(String, NaiveDate), Counts>,
    state_codes: &StateCodeMap,
) -> Result<BTreeMap<(String, NaiveDate), Counts>, DataError> {
    let mut by_state = BTreeMap::<(String, NaiveDate), Counts>::new();
    for ((code, date), counts) in by_code {
        let state = state_codes
            .resolve(&code)
            .ok_or_else(|| DataError::UnknownStateCode(code.clone()))?;
        by_state
            .entry((state.to_string(), date))
            .or_default()
            .merge(counts)
            .ok_or_else(|| overflow(state, date))?;
    }
    Ok(by_state)
}

/// Input is ordered by (state, date), so a running sum that resets whenever
/// the state changes yields per-state cumulative totals.
fn accumulate(
    by_state: BTreeMap<(String, NaiveDate), Counts>,
) -> Result<Vec<IndiaDailyRecord>, DataError> {
    let mut records = Vec::with_capacity(by_state.len());
    let mut current: Option<String> = None;
    let (mut total_confirmed, mut total_deceased) = (0i64, 0i64);

    for ((state, date), counts) in by_state {
        if current.as_deref() != Some(state.as_str()) {
            total_confirmed = 0;
            total_deceased = 0;
            current = Some(state.clone());
        }
        total_confirmed = total_confirmed
            .checked_add(counts.confirmed)
            .ok_or_else(|| overflow(&state, date))?;
        total_deceased = total_deceased
            .checked_add(counts.deceased)
            .ok_or_else(|| overflow(&state, date))?;
        records.push(IndiaDailyRecord {
            date,
            state,
            confirmed: counts.confirmed,
            deceased: counts.deceased,
            recovered: counts.recovered,
            total_confirmed,
            total_deceased,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn codes() -> StateCodeMap {
        StateCodeMap::new([("dl", "Delhi"), ("kl", "Kerala"), ("mh", "Maharashtra")])
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn nested_shape_accumulates_per_state() {
        let raw = br#"{
            "2020-04-01": {"confirmed": {"dl": "5"}},
            "2020-04-02": {"confirmed": {"dl": "7"}, "deceased": {"dl": "1"}}
        }"#;
        let records = normalize(raw, &codes()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.state == "Delhi"));
        assert_eq!(records[0].date, day(2020, 4, 1));
        assert_eq!(records[0].total_confirmed, 5);
        assert_eq!(records[1].total_confirmed, 12);
        assert_eq!(records[1].total_deceased, 1);
        assert_eq!(records[0].recovered, 0);
    }

    #[test]
    fn upstream_shape_pivots_statuses() {
        let raw = br#"{"states_daily": [
            {"date": "15-Mar-20", "dateymd": "2020-03-15", "status": "Confirmed", "dl": "2", "kl": "3", "tt": "5"},
            {"date": "14-Mar-20", "dateymd": "2020-03-14", "status": "Confirmed", "dl": "7", "kl": "0", "tt": "7"},
            {"date": "14-Mar-20", "dateymd": "2020-03-14", "status": "Recovered", "dl": "1", "kl": "", "tt": "1"},
            {"date": "14-Mar-20", "dateymd": "2020-03-14", "status": "Deceased", "dl": "1", "kl": "0", "tt": "1"}
        ]}"#;
        let records = normalize(raw, &codes()).unwrap();

        let keys: Vec<_> = records
            .iter()
            .map(|r| (r.state.as_str(), r.date))
            .collect();
        assert_eq!(
            keys,
            [
                ("Delhi", day(2020, 3, 14)),
                ("Delhi", day(2020, 3, 15)),
                ("Kerala", day(2020, 3, 14)),
                ("Kerala", day(2020, 3, 15)),
                ("Total", day(2020, 3, 14)),
                ("Total", day(2020, 3, 15)),
            ]
        );
        let delhi = &records[0];
        assert_eq!((delhi.confirmed, delhi.deceased, delhi.recovered), (7, 1, 1));
        assert_eq!(records[1].total_confirmed, 9);
        assert_eq!(records[1].total_deceased, 1);
        assert_eq!(records[3].total_confirmed, 3);
        assert_eq!(records[5].total_confirmed, 12);
    }

    #[test]
    fn duplicate_cells_are_summed() {
        let raw = br#"{"states_daily": [
            {"date": "14-Mar-20", "status": "Confirmed", "mh": "4"},
            {"date": "14-Mar-20", "status": "Confirmed", "mh": "6"}
        ]}"#;
        let records = normalize(raw, &codes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].confirmed, 10);
    }

    #[test]
    fn running_totals_match_prefix_sums() {
        let raw = br#"{"states_daily": [
            {"date": "01-Apr-20", "status": "Confirmed", "dl": "3", "kl": "1"},
            {"date": "03-Apr-20", "status": "Confirmed", "dl": "-1", "kl": "4"},
            {"date": "02-Apr-20", "status": "Confirmed", "dl": "9", "kl": "2"},
            {"date": "02-Apr-20", "status": "Deceased", "dl": "2", "kl": "0"}
        ]}"#;
        let records = normalize(raw, &codes()).unwrap();
        for record in &records {
            let prefix: i64 = records
                .iter()
                .filter(|r| r.state == record.state && r.date <= record.date)
                .map(|r| r.confirmed)
                .sum();
            assert_eq!(record.total_confirmed, prefix);
            let deceased: i64 = records
                .iter()
                .filter(|r| r.state == record.state && r.date <= record.date)
                .map(|r| r.deceased)
                .sum();
            assert_eq!(record.total_deceased, deceased);
        }
        assert_eq!(normalize(raw, &codes()).unwrap(), records);
    }

    #[test]
    fn unmapped_code_is_an_error() {
        let raw = br#"{"states_daily": [{"date": "14-Mar-20", "status": "Confirmed", "un": "1"}]}"#;
        let err = normalize(raw, &codes()).unwrap_err();
        assert_matches!(err, DataError::UnknownStateCode(code) if code == "un");
    }

    #[test]
    fn missing_status_is_an_error() {
        let raw = br#"{"states_daily": [{"date": "14-Mar-20", "dl": "1"}]}"#;
        let err = normalize(raw, &codes()).unwrap_err();
        assert_matches!(err, DataError::MissingColumn { column, .. } if column == "status");
    }

    #[test]
    fn overflowing_running_total_is_malformed() {
        let raw = br#"{"states_daily": [
            {"date": "14-Mar-20", "status": "Confirmed", "dl": "9e18"},
            {"date": "15-Mar-20", "status": "Confirmed", "dl": "9e18"}
        ]}"#;
        let err = normalize(raw, &codes()).unwrap_err();
        assert_matches!(
            err,
            DataError::Malformed { feed: SourceId::IndiaDaily, message } if message.contains("overflows")
        );
    }

    #[test]
    fn overflowing_duplicate_cells_are_malformed() {
        let raw = br#"{"states_daily": [
            {"date": "14-Mar-20", "status": "Deceased", "mh": "9e18"},
            {"date": "14-Mar-20", "status": "Deceased", "mh": "9e18"}
        ]}"#;
        let err = normalize(raw, &codes()).unwrap_err();
        assert_matches!(err, DataError::Malformed { message, .. } if message.contains("mh"));
    }
}
