use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use covid19_data::error::DataError;
use covid19_data::reference::ReferenceData;

fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

#[test]
fn loads_both_reference_files() {
    let dir = tempfile::tempdir().unwrap();
    let codes = utf8(dir.path().join("state_codes.json"));
    let population = utf8(dir.path().join("state_pop.csv"));
    fs::write(&codes, r#"{"dl": "Delhi", "mh": "Maharashtra"}"#).unwrap();
    fs::write(
        &population,
        ",State or union territory,Population,Density\n\
         0,Maharashtra,112374333,365\n\
         1,Delhi,16787941,11297\n\
         2,Total,1210854977,382\n",
    )
    .unwrap();

    let references = ReferenceData::load(&codes, &population).unwrap();
    assert_eq!(references.state_codes.resolve("MH"), Some("Maharashtra"));
    assert_eq!(references.population.len(), 3);
    let delhi = references.population.get("Delhi").unwrap();
    assert_eq!(delhi.population, 16_787_941);
    assert_eq!(delhi.density, 11_297);
}

#[test]
fn population_without_density_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let codes = utf8(dir.path().join("state_codes.json"));
    let population = utf8(dir.path().join("state_pop.csv"));
    fs::write(&codes, "{}").unwrap();
    fs::write(&population, "State or union territory,Population\nDelhi,1\n").unwrap();

    let err = ReferenceData::load(&codes, &population).unwrap_err();
    assert_matches!(err, DataError::Reference { message, .. } if message.contains("Density"));
}

#[test]
fn missing_reference_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let codes = utf8(dir.path().join("nope.json"));
    let population = utf8(dir.path().join("nope.csv"));
    let err = ReferenceData::load(&codes, &population).unwrap_err();
    assert_matches!(err, DataError::Filesystem(_));
}
