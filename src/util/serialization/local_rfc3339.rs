use chrono::{DateTime, Local};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

/// Serializes a local-time timestamp as ISO-8601 with a colon in the numeric
/// offset (e.g. `2026-01-30T17:08:09+07:00`), which `DateTime::to_rfc3339`
/// already produces for `Local` but `%z`-style manual formatting would not.
pub fn serialize<S>(time: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&time.to_rfc3339())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(D::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_colon_offset() {
        let fixed = chrono::FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 30, 17, 8, 9)
            .unwrap();
        let local = fixed.with_timezone(&Local);
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buf);
        serialize(&local, &mut serializer).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains(':'));
        assert!(s.starts_with('"'));
    }

    #[test]
    fn round_trips_through_json() {
        let fixed = chrono::FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 30, 17, 8, 9)
            .unwrap();
        let local = fixed.with_timezone(&Local);

        let mut buf = Vec::new();
        serialize(&local, &mut serde_json::Serializer::new(&mut buf)).unwrap();

        let mut de = serde_json::Deserializer::from_slice(&buf);
        let round_tripped = deserialize(&mut de).unwrap();
        assert_eq!(round_tripped.to_rfc3339(), local.to_rfc3339());
    }

    #[test]
    fn rejects_malformed_input() {
        let mut de = serde_json::Deserializer::from_str("\"not a timestamp\"");
        assert!(deserialize(&mut de).is_err());
    }
}
