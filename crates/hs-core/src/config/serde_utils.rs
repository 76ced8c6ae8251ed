//! Serde helpers shared by the configuration types

/// `Duration` stored as whole seconds
///
/// Keeps `host.toml` readable: `heartbeat_interval = 120` rather than a
/// nested `{ secs, nanos }` table. Sub-second precision is dropped on save.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
