use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Global,
    IndiaDaily,
    IndiaTotal,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Global, SourceId::IndiaDaily, SourceId::IndiaTotal];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Global => "global",
            SourceId::IndiaDaily => "india_daily",
            SourceId::IndiaTotal => "india_total",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = DataError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "global" => Ok(SourceId::Global),
            "india_daily" => Ok(SourceId::IndiaDaily),
            "india_total" => Ok(SourceId::IndiaTotal),
            _ => Err(DataError::UnknownSource(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Csv,
    Json,
}

/// One remote feed: where it lives and where its cached copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: SourceId,
    pub url: String,
    pub file_name: String,
    pub format: FeedFormat,
}

/// The fixed set of feeds a refresh depends on.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(global_url: &str, india_daily_url: &str, india_total_url: &str) -> Self {
        Self {
            sources: vec![
                Source {
                    id: SourceId::Global,
                    url: global_url.to_string(),
                    file_name: "covid19_global_data.csv".to_string(),
                    format: FeedFormat::Csv,
                },
                Source {
                    id: SourceId::IndiaDaily,
                    url: india_daily_url.to_string(),
                    file_name: "states_daily.json".to_string(),
                    format: FeedFormat::Json,
                },
                Source {
                    id: SourceId::IndiaTotal,
                    url: india_total_url.to_string(),
                    file_name: "states_total.json".to_string(),
                    format: FeedFormat::Json,
                },
            ],
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, id: SourceId) -> Option<&Source> {
        self.sources.iter().find(|source| source.id == id)
    }

    pub fn set_url(&mut self, id: SourceId, url: impl Into<String>) {
        if let Some(source) = self.sources.iter_mut().find(|source| source.id == id) {
            source.url = url.into();
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(
            "https://covid.ourworldindata.org/data/owid-covid-data.csv",
            "https://api.covid19india.org/states_daily.json",
            "https://api.covid19india.org/data.json",
        )
    }
}

/// Downloaded payload of one feed.
#[derive(Debug, Clone)]
pub struct RawFeed {
    pub source: SourceId,
    pub path: Utf8PathBuf,
    pub bytes: Vec<u8>,
    pub modified: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalCaseRecord {
    pub iso_code: String,
    pub continent: String,
    pub country: String,
    pub date: NaiveDate,
    pub total_cases: i64,
    pub new_cases: i64,
    pub total_deaths: i64,
    pub new_deaths: i64,
    pub new_tests: i64,
    pub total_tests: i64,
    pub tests_per_case: f64,
    pub positive_rate: f64,
    pub population: i64,
    pub population_density: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndiaDailyRecord {
    pub date: NaiveDate,
    pub state: String,
    pub confirmed: i64,
    pub deceased: i64,
    pub recovered: i64,
    pub total_confirmed: i64,
    pub total_deceased: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndiaTotalRecord {
    pub statecode: String,
    pub state: String,
    pub lastupdatedtime: Option<NaiveDateTime>,
    pub confirmed: i64,
    pub active: i64,
    pub recovered: i64,
    pub deaths: i64,
    pub population: i64,
    pub density: i64,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_source_id() {
        let id: SourceId = "india_daily".parse().unwrap();
        assert_eq!(id, SourceId::IndiaDaily);
        assert_eq!(id.to_string(), "india_daily");
    }

    #[test]
    fn parse_source_id_invalid() {
        let err = "who".parse::<SourceId>().unwrap_err();
        assert_matches!(err, DataError::UnknownSource(_));
    }

    #[test]
    fn default_registry_declares_every_source() {
        let registry = SourceRegistry::default();
        assert_eq!(registry.sources().len(), 3);
        for id in SourceId::ALL {
            assert_eq!(registry.get(id).unwrap().id, id);
        }
        assert_eq!(registry.get(SourceId::Global).unwrap().format, FeedFormat::Csv);
        assert_eq!(
            registry.get(SourceId::IndiaTotal).unwrap().file_name,
            "states_total.json"
        );
    }

    #[test]
    fn override_url() {
        let mut registry = SourceRegistry::default();
        registry.set_url(SourceId::IndiaDaily, "http://localhost/daily.json");
        assert_eq!(
            registry.get(SourceId::IndiaDaily).unwrap().url,
            "http://localhost/daily.json"
        );
    }
}
