//! Static reference inputs: the state code map and the population table.
//!
//! Both are loaded read-only from files named in the config and handed to
//! the normalizers, never looked up from inside them.

use std::collections::{BTreeMap, HashMap};
use std::fs;

use camino::Utf8Path;

use crate::error::DataError;
use crate::parse::parse_count;

pub const TOTAL_CODE: &str = "tt";
pub const TOTAL_STATE: &str = "Total";

/// Lower-case state code to human readable state name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateCodeMap {
    names: BTreeMap<String, String>,
}

impl StateCodeMap {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let names = entries
            .into_iter()
            .map(|(code, name)| (code.into().trim().to_lowercase(), name.into()))
            .collect();
        Self { names }
    }

    /// Reads a JSON object of `{"code": "State name"}` pairs.
    pub fn from_json(content: &str, origin: &str) -> Result<Self, DataError> {
        let entries: BTreeMap<String, String> =
            serde_json::from_str(content).map_err(|err| DataError::Reference {
                path: origin.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self::new(entries))
    }

    pub fn load(path: &Utf8Path) -> Result<Self, DataError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| DataError::Filesystem(format!("read {path}: {err}")))?;
        Self::from_json(&content, path.as_str())
    }

    /// Resolves a code; `tt` always maps to the all-India aggregate.
    pub fn resolve(&self, code: &str) -> Option<&str> {
        let code = code.trim().to_lowercase();
        if code == TOTAL_CODE {
            return Some(TOTAL_STATE);
        }
        self.names.get(&code).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Population {
    pub population: i64,
    pub density: i64,
}

/// Population and density per state or union territory, keyed by exact name.
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    states: HashMap<String, Population>,
}

const STATE_COLUMN: &str = "State or union territory";
const POPULATION_COLUMN: &str = "Population";
const DENSITY_COLUMN: &str = "Density";

impl PopulationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, state: impl Into<String>, population: i64, density: i64) {
        self.states.insert(
            state.into(),
            Population {
                population,
                density,
            },
        );
    }

    pub fn get(&self, state: &str) -> Option<Population> {
        self.states.get(state).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Parses the reference CSV. Extra columns, such as a leading index
    /// column, are ignored.
    pub fn from_csv(content: &[u8], origin: &str) -> Result<Self, DataError> {
        let reference_err = |message: String| DataError::Reference {
            path: origin.to_string(),
            message,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content);
        let headers = reader
            .headers()
            .map_err(|err| reference_err(err.to_string()))?
            .clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim() == name)
                .ok_or_else(|| reference_err(format!("missing column `{name}`")))
        };
        let state_idx = column(STATE_COLUMN)?;
        let population_idx = column(POPULATION_COLUMN)?;
        let density_idx = column(DENSITY_COLUMN)?;

        let mut table = Self::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|err| reference_err(err.to_string()))?;
            let field = |idx: usize| record.get(idx).unwrap_or("").trim();
            let state = field(state_idx);
            if state.is_empty() {
                continue;
            }
            let population = parse_count(field(population_idx))
                .map_err(|message| reference_err(format!("row {}: {message}", row + 1)))?;
            let density = parse_count(field(density_idx))
                .map_err(|message| reference_err(format!("row {}: {message}", row + 1)))?;
            if table.get(state).is_some() {
                return Err(reference_err(format!("duplicate state `{state}`")));
            }
            table.insert(state, population, density);
        }
        Ok(table)
    }

    pub fn load(path: &Utf8Path) -> Result<Self, DataError> {
        let content = fs::read(path.as_std_path())
            .map_err(|err| DataError::Filesystem(format!("read {path}: {err}")))?;
        Self::from_csv(&content, path.as_str())
    }
}

/// Both reference inputs, as handed to a refresh.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub state_codes: StateCodeMap,
    pub population: PopulationTable,
}

impl ReferenceData {
    pub fn load(state_codes: &Utf8Path, population: &Utf8Path) -> Result<Self, DataError> {
        Ok(Self {
            state_codes: StateCodeMap::load(state_codes)?,
            population: PopulationTable::load(population)?,
        })
    }
}
