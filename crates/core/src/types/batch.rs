//! Return batch number type.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors that can occur when parsing a [`BatchNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchNumberError {
    /// The input string is empty.
    #[error("batch number cannot be empty")]
    Empty,
    /// The input does not contain a `/` separator.
    #[error("batch number must look like '{{order}}/{{sequence}}'")]
    MissingSeparator,
    /// The order number part (before `/`) is empty.
    #[error("batch number order part cannot be empty")]
    EmptyOrderNumber,
    /// The sequence part is not a positive integer.
    #[error("batch sequence must be a positive integer, got '{0}'")]
    InvalidSequence(String),
}

/// Identifier shared by every line returned together from one order.
///
/// Rendered as `{order_number}/{sequence}`, e.g. `64168/2` for the second
/// return batch raised against order `64168`. The sequence starts at 1 and is
/// assigned once, at initiation.
///
/// ## Examples
///
/// ```
/// use threadline_core::BatchNumber;
///
/// let batch = BatchNumber::new("64168", 1);
/// assert_eq!(batch.to_string(), "64168/1");
///
/// let parsed = BatchNumber::parse("64168/2").unwrap();
/// assert_eq!(parsed.order_number(), "64168");
/// assert_eq!(parsed.sequence(), 2);
///
/// assert!(BatchNumber::parse("64168").is_err());
/// assert!(BatchNumber::parse("64168/0").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchNumber {
    order_number: String,
    sequence: i32,
}

impl BatchNumber {
    /// Build a batch number from its parts.
    #[must_use]
    pub fn new(order_number: impl Into<String>, sequence: i32) -> Self {
        Self {
            order_number: order_number.into(),
            sequence,
        }
    }

    /// The batch that follows `prior_batches` existing batches of an order.
    #[must_use]
    pub fn next_for(order_number: &str, prior_batches: i64) -> Self {
        let sequence = i32::try_from(prior_batches.saturating_add(1)).unwrap_or(i32::MAX);
        Self::new(order_number, sequence)
    }

    /// Parse a `BatchNumber` from its `{order}/{sequence}` form.
    ///
    /// The split happens on the last `/`, so order numbers containing a slash
    /// still parse.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, lacks a separator, has an empty
    /// order part, or the sequence is not a positive integer.
    pub fn parse(s: &str) -> Result<Self, BatchNumberError> {
        if s.is_empty() {
            return Err(BatchNumberError::Empty);
        }

        let (order, seq) = s
            .rsplit_once('/')
            .ok_or(BatchNumberError::MissingSeparator)?;

        if order.is_empty() {
            return Err(BatchNumberError::EmptyOrderNumber);
        }

        let sequence = seq
            .parse::<i32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| BatchNumberError::InvalidSequence(seq.to_owned()))?;

        Ok(Self::new(order, sequence))
    }

    /// The order number part.
    #[must_use]
    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    /// The per-order sequence part.
    #[must_use]
    pub const fn sequence(&self) -> i32 {
        self.sequence
    }
}

impl fmt::Display for BatchNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.order_number, self.sequence)
    }
}

impl std::str::FromStr for BatchNumber {
    type Err = BatchNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BatchNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BatchNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for BatchNumber {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for BatchNumber {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for BatchNumber {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.to_string(), buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_next_for_first_batch() {
        assert_eq!(BatchNumber::next_for("64168", 0).to_string(), "64168/1");
    }

    #[test]
    fn test_next_for_after_prior_batches() {
        assert_eq!(BatchNumber::next_for("64168", 1).to_string(), "64168/2");
        assert_eq!(BatchNumber::next_for("A-9", 4).to_string(), "A-9/5");
    }

    #[test]
    fn test_parse_splits_on_last_separator() {
        let batch = BatchNumber::parse("EX/64168/3").unwrap();
        assert_eq!(batch.order_number(), "EX/64168");
        assert_eq!(batch.sequence(), 3);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(BatchNumber::parse(""), Err(BatchNumberError::Empty));
    }

    #[test]
    fn test_parse_missing_separator() {
        assert_eq!(
            BatchNumber::parse("64168"),
            Err(BatchNumberError::MissingSeparator)
        );
    }

    #[test]
    fn test_parse_empty_order() {
        assert_eq!(
            BatchNumber::parse("/1"),
            Err(BatchNumberError::EmptyOrderNumber)
        );
    }

    #[test]
    fn test_parse_rejects_non_positive_sequence() {
        assert!(matches!(
            BatchNumber::parse("64168/0"),
            Err(BatchNumberError::InvalidSequence(_))
        ));
        assert!(matches!(
            BatchNumber::parse("64168/-2"),
            Err(BatchNumberError::InvalidSequence(_))
        ));
        assert!(matches!(
            BatchNumber::parse("64168/one"),
            Err(BatchNumberError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_display_matches_parse_input() {
        let batch: BatchNumber = "64168/12".parse().unwrap();
        assert_eq!(batch.to_string(), "64168/12");
    }
}
