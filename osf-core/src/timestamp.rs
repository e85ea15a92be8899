use serde::{Deserialize, Deserializer};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

/// Parses API timestamps into unix seconds. Values without an offset are UTC.
pub fn parse_timestamp(value: &str) -> Result<i64, time::error::Parse> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed.unix_timestamp());
    }
    let parsed = PrimitiveDateTime::parse(value, &Iso8601::DEFAULT)?;
    Ok(parsed.assume_utc().unix_timestamp())
}

pub(crate) fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| parse_timestamp(&value).map_err(serde::de::Error::custom))
        .transpose()
}
