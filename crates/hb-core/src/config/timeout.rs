//! Timeouts written as whole seconds in the config file

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(timeout.as_secs())
}

/// A zero timeout would fail every connection attempt, so it is refused here
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match u64::deserialize(deserializer)? {
        0 => Err(D::Error::custom("timeout must be at least one second")),
        secs => Ok(Duration::from_secs(secs)),
    }
}
