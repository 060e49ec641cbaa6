use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde `with` module for config fields expressed in MiB in TOML but held
/// internally in KiB, the unit the detector and snapshot types use.
pub fn serialize<S>(kib: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    (kib / 1024).serialize(serializer)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let mib = u64::deserialize(deserializer)?;
    Ok(mib * 1024)
}

#[cfg(test)]
mod tests {
    #[test]
    fn round_trips_mib_to_kib() {
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buf);
        super::serialize(&2048, &mut serializer).unwrap();
        assert_eq!(&buf, b"2");
    }
}
