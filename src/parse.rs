use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Parses an integer count. Empty input is zero; fractional input such as
/// `"1234.0"` is truncated toward zero.
pub fn parse_count(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value.trunc() as i64),
        Ok(_) => Ok(0),
        Err(_) => Err(format!("`{raw}` is not a number")),
    }
}

/// Parses a float measure. Empty or non-finite input is zero.
pub fn parse_measure(raw: &str) -> Result<f64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Ok(0.0),
        Err(_) => Err(format!("`{raw}` is not a number")),
    }
}

pub fn parse_date(raw: &str, formats: &[&str]) -> Result<NaiveDate, String> {
    let raw = raw.trim();
    formats
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .ok_or_else(|| format!("`{raw}` is not a date"))
}

/// Day-first timestamp such as `26/04/2020 21:48:27`. A missing time of day
/// is midnight.
pub fn parse_day_first(raw: &str) -> Result<Option<NaiveDateTime>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M:%S") {
        return Ok(Some(value));
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M") {
        return Ok(Some(value));
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(Some)
        .ok_or_else(|| format!("`{raw}` is not a day-first timestamp"))
}

/// Text of a JSON scalar; the feeds mix quoted and bare numbers.
pub fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts() {
        assert_eq!(parse_count(""), Ok(0));
        assert_eq!(parse_count(" 42 "), Ok(42));
        assert_eq!(parse_count("1234.9"), Ok(1234));
        assert_eq!(parse_count("-3"), Ok(-3));
        assert!(parse_count("n/a").is_err());
    }

    #[test]
    fn measures() {
        assert_eq!(parse_measure(""), Ok(0.0));
        assert_eq!(parse_measure("0.125"), Ok(0.125));
        assert!(parse_measure("x").is_err());
    }

    #[test]
    fn day_first_timestamps() {
        let value = parse_day_first("02/05/2020 21:48:27").unwrap().unwrap();
        assert_eq!(value.to_string(), "2020-05-02 21:48:27");
        assert_eq!(parse_day_first(""), Ok(None));
        assert!(parse_day_first("2020-05-02").is_err());
    }

    #[test]
    fn dates_try_each_format() {
        let date = parse_date("14-Mar-20", &["%Y-%m-%d", "%d-%b-%y"]).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 3, 14).unwrap());
    }
}
