//! RFC 3339 timestamps as used by notifications and subscriptions.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formats a timestamp in RFC 3339 form.
///
/// Falls back to the Unix epoch rendering for timestamps outside the range
/// RFC 3339 can express.
#[must_use]
pub fn format(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Parses an RFC 3339 timestamp.
///
/// # Errors
///
/// Returns the parser error when `input` is not valid RFC 3339.
pub fn parse(input: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(input, &Rfc3339)
}

/// Serde adapter storing [`OffsetDateTime`] as an RFC 3339 string.
pub mod rfc3339 {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use time::OffsetDateTime;

    /// Serialises the timestamp as RFC 3339.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn serialize<S: Serializer>(
        timestamp: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format(*timestamp))
    }

    /// Deserialises an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Fails when the input is not a valid RFC 3339 string.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse(&text).map_err(D::Error::custom)
    }
}
