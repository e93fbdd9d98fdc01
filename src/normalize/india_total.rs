use serde_json::{Map, Value};

use crate::domain::{IndiaTotalRecord, SourceId};
use crate::error::DataError;
use crate::normalize::{malformed, missing_column};
use crate::parse::{json_text, parse_count, parse_day_first};
use crate::reference::PopulationTable;

const FEED: SourceId = SourceId::IndiaTotal;

pub const UNASSIGNED_STATE: &str = "State Unassigned";

/// Normalizes the cumulative totals feed and inner-joins it with the
/// population table on exact state name. States missing from either side are
/// dropped.
pub fn normalize(
    raw: &[u8],
    population: &PopulationTable,
) -> Result<Vec<IndiaTotalRecord>, DataError> {
    let document: Value =
        serde_json::from_slice(raw).map_err(|err| malformed(FEED, err.to_string()))?;
    let rows = document
        .get("statewise")
        .ok_or_else(|| missing_column(FEED, "statewise"))?
        .as_array()
        .ok_or_else(|| malformed(FEED, "`statewise` is not an array"))?;

    let mut records = Vec::new();
    let mut unmatched = Vec::new();
    for row in rows {
        let row = row
            .as_object()
            .ok_or_else(|| malformed(FEED, "`statewise` entry is not an object"))?;
        let state = text(row, "state")?;
        if state.trim() == UNASSIGNED_STATE {
            continue;
        }
        let statecode = text(row, "statecode")?;
        let lastupdatedtime = parse_day_first(&text(row, "lastupdatedtime")?)
            .map_err(|message| malformed(FEED, format!("{state}: {message}")))?;
        let confirmed = count(row, &state, "confirmed")?;
        let active = count(row, &state, "active")?;
        let recovered = count(row, &state, "recovered")?;
        let deaths = count(row, &state, "deaths")?;

        let Some(reference) = population.get(&state) else {
            unmatched.push(state);
            continue;
        };
        records.push(IndiaTotalRecord {
            statecode,
            state,
            lastupdatedtime,
            confirmed,
            active,
            recovered,
            deaths,
            population: reference.population,
            density: reference.density,
        });
    }

    if !unmatched.is_empty() {
        tracing::warn!(states = ?unmatched, "states without population reference dropped");
    }
    tracing::debug!(rows = records.len(), "normalized india totals feed");
    Ok(records)
}

fn text(row: &Map<String, Value>, column: &str) -> Result<String, DataError> {
    row.get(column)
        .map(json_text)
        .ok_or_else(|| missing_column(FEED, column))
}

fn count(row: &Map<String, Value>, state: &str, column: &str) -> Result<i64, DataError> {
    parse_count(&text(row, column)?)
        .map_err(|message| malformed(FEED, format!("{state} {column}: {message}")))
}
