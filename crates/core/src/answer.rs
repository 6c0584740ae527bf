//! Typed answer values.
//!
//! An [`AnswerValue`] is a tagged union over the base value kinds with a
//! second axis for sequences. The [`AnswerResultType`] attached to an answer
//! declares which kind is expected and how it is encoded.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, ResultError};
use crate::Time;

/// Base kind of an answer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaseType {
    /// true / false
    Boolean,
    /// Whole number
    Integer,
    /// Floating point number
    Decimal,
    /// Free text
    String,
    /// Timestamp
    Date,
    /// Raw bytes, base64 encoded
    Data,
    /// Arbitrary JSON document
    Codable,
}

/// Sequence wrapper around base values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SequenceType {
    /// Ordered list
    Array,
    /// String-keyed map
    Dictionary,
}

/// Describes the type and encoding of an answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResultType {
    /// Base kind of each value
    pub base_type: BaseType,

    /// Sequence wrapper, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_type: Option<SequenceType>,

    /// chrono format pattern for dates (RFC 3339 when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,

    /// Unit of a numeric answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Joins array values into a single string when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_separator: Option<String>,
}

impl AnswerResultType {
    /// Create a type for single values of `base_type`.
    pub fn new(base_type: BaseType) -> Self {
        Self {
            base_type,
            sequence_type: None,
            date_format: None,
            unit: None,
            sequence_separator: None,
        }
    }

    /// Boolean answers.
    pub fn boolean() -> Self {
        Self::new(BaseType::Boolean)
    }

    /// Integer answers.
    pub fn integer() -> Self {
        Self::new(BaseType::Integer)
    }

    /// Decimal answers.
    pub fn decimal() -> Self {
        Self::new(BaseType::Decimal)
    }

    /// Text answers.
    pub fn string() -> Self {
        Self::new(BaseType::String)
    }

    /// Date answers.
    pub fn date() -> Self {
        Self::new(BaseType::Date)
    }

    /// Wrap in a sequence.
    pub fn with_sequence(mut self, sequence_type: SequenceType) -> Self {
        self.sequence_type = Some(sequence_type);
        self
    }

    /// Set the date format.
    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the array separator.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.sequence_separator = Some(separator.into());
        self
    }

    /// Check that `value` has the declared base and sequence type.
    pub fn validate(&self, value: &AnswerValue) -> Result<()> {
        if value.sequence_type() != self.sequence_type {
            return Err(ResultError::SequenceMismatch {
                expected: self.sequence_type,
                actual: value.sequence_type(),
            });
        }
        for base in value.elements() {
            if base.base_type() != self.base_type {
                return Err(ResultError::AnswerTypeMismatch {
                    expected: self.base_type,
                    actual: base.base_type(),
                });
            }
        }
        Ok(())
    }

    /// Encode `value` as JSON.
    pub fn encode(&self, value: &AnswerValue) -> Result<Value> {
        self.validate(value)?;
        match value {
            AnswerValue::Single(base) => self.encode_base(base),
            AnswerValue::Array(items) => {
                let encoded = items
                    .iter()
                    .map(|item| self.encode_base(item))
                    .collect::<Result<Vec<_>>>()?;
                match &self.sequence_separator {
                    Some(separator) => {
                        let parts: Vec<String> = encoded
                            .into_iter()
                            .map(|v| match v {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                            .collect();
                        Ok(Value::String(parts.join(separator)))
                    }
                    None => Ok(Value::Array(encoded)),
                }
            }
            AnswerValue::Dictionary(map) => {
                let mut object = serde_json::Map::new();
                for (key, item) in map {
                    object.insert(key.clone(), self.encode_base(item)?);
                }
                Ok(Value::Object(object))
            }
        }
    }

    /// Decode JSON into a value. `null` decodes to `None`.
    pub fn decode(&self, json: &Value) -> Result<Option<AnswerValue>> {
        if json.is_null() {
            return Ok(None);
        }
        let value = match (self.sequence_type, json) {
            (None, _) => AnswerValue::Single(self.decode_base(json)?),
            (Some(SequenceType::Array), Value::Array(items)) => AnswerValue::Array(
                items
                    .iter()
                    .map(|item| self.decode_base(item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            (Some(SequenceType::Array), Value::String(joined)) if self.sequence_separator.is_some() => {
                let separator = self.sequence_separator.as_deref().unwrap_or(",");
                AnswerValue::Array(
                    joined
                        .split(separator)
                        .map(|part| self.decode_text(part.trim()))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            (Some(SequenceType::Dictionary), Value::Object(object)) => {
                let mut map = BTreeMap::new();
                for (key, item) in object {
                    map.insert(key.clone(), self.decode_base(item)?);
                }
                AnswerValue::Dictionary(map)
            }
            _ => return Err(self.decode_error(json)),
        };
        Ok(Some(value))
    }

    fn encode_base(&self, value: &BaseValue) -> Result<Value> {
        Ok(match value {
            BaseValue::Boolean(b) => Value::Bool(*b),
            BaseValue::Integer(i) => Value::from(*i),
            BaseValue::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .ok_or(ResultError::NonFinite(*d))?,
            BaseValue::String(s) => Value::String(s.clone()),
            BaseValue::Date(date) => Value::String(self.format_date(date)?),
            BaseValue::Data(bytes) => Value::String(STANDARD.encode(bytes)),
            BaseValue::Codable(doc) => doc.clone(),
        })
    }

    fn decode_base(&self, json: &Value) -> Result<BaseValue> {
        let decoded = match (self.base_type, json) {
            (BaseType::Boolean, Value::Bool(b)) => Some(BaseValue::Boolean(*b)),
            (BaseType::Integer, Value::Number(n)) => n.as_i64().map(BaseValue::Integer),
            (BaseType::Decimal, Value::Number(n)) => n.as_f64().map(BaseValue::Decimal),
            (BaseType::Codable, doc) => Some(BaseValue::Codable(doc.clone())),
            (_, Value::String(s)) if self.base_type != BaseType::Boolean => {
                return self.decode_text(s);
            }
            _ => None,
        };
        decoded.ok_or_else(|| self.decode_error(json))
    }

    /// Decode a value from its textual form, as found in joined arrays.
    fn decode_text(&self, text: &str) -> Result<BaseValue> {
        let decoded = match self.base_type {
            BaseType::Boolean => text.parse().ok().map(BaseValue::Boolean),
            BaseType::Integer => text.parse().ok().map(BaseValue::Integer),
            BaseType::Decimal => text.parse().ok().map(BaseValue::Decimal),
            BaseType::String => Some(BaseValue::String(text.to_string())),
            BaseType::Date => self.parse_date(text).map(BaseValue::Date),
            BaseType::Data => STANDARD.decode(text).ok().map(BaseValue::Data),
            BaseType::Codable => Some(BaseValue::Codable(Value::String(text.to_string()))),
        };
        decoded.ok_or_else(|| ResultError::Decode {
            base_type: self.base_type,
            value: text.to_string(),
        })
    }

    fn format_date(&self, date: &Time) -> Result<String> {
        let Some(format) = &self.date_format else {
            return Ok(date.to_rfc3339());
        };
        let mut text = String::new();
        write!(text, "{}", date.format(format)).map_err(|_| ResultError::DateFormat(format.clone()))?;
        Ok(text)
    }

    fn parse_date(&self, text: &str) -> Option<Time> {
        let Some(format) = &self.date_format else {
            return DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|d| d.with_timezone(&Utc));
        };
        if let Ok(date) = DateTime::parse_from_str(text, format) {
            return Some(date.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    fn decode_error(&self, json: &Value) -> ResultError {
        ResultError::Decode {
            base_type: self.base_type,
            value: json.to_string(),
        }
    }
}

/// A single answer value.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseValue {
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Decimal
    Decimal(f64),
    /// Text
    String(String),
    /// Timestamp
    Date(Time),
    /// Bytes
    Data(Vec<u8>),
    /// JSON document
    Codable(Value),
}

impl BaseValue {
    /// The kind of this value.
    pub fn base_type(&self) -> BaseType {
        match self {
            Self::Boolean(_) => BaseType::Boolean,
            Self::Integer(_) => BaseType::Integer,
            Self::Decimal(_) => BaseType::Decimal,
            Self::String(_) => BaseType::String,
            Self::Date(_) => BaseType::Date,
            Self::Data(_) => BaseType::Data,
            Self::Codable(_) => BaseType::Codable,
        }
    }

    /// Numeric view used for ordering comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Decimal(d) => Some(*d),
            Self::Date(date) => Some(date.timestamp_millis() as f64),
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Equality that treats integers and decimals as the same number line.
    pub fn matches(&self, other: &BaseValue) -> bool {
        match (self, other) {
            (Self::Integer(_) | Self::Decimal(_), Self::Integer(_) | Self::Decimal(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }
}

/// An answer value with its sequence shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerValue {
    /// One value
    Single(BaseValue),
    /// Ordered values
    Array(Vec<BaseValue>),
    /// Keyed values
    Dictionary(BTreeMap<String, BaseValue>),
}

impl AnswerValue {
    /// Sequence shape of this value.
    pub fn sequence_type(&self) -> Option<SequenceType> {
        match self {
            Self::Single(_) => None,
            Self::Array(_) => Some(SequenceType::Array),
            Self::Dictionary(_) => Some(SequenceType::Dictionary),
        }
    }

    /// All base values contained in this answer.
    pub fn elements(&self) -> Vec<&BaseValue> {
        match self {
            Self::Single(v) => vec![v],
            Self::Array(items) => items.iter().collect(),
            Self::Dictionary(map) => map.values().collect(),
        }
    }

    /// The single value, if this is not a sequence.
    pub fn as_single(&self) -> Option<&BaseValue> {
        match self {
            Self::Single(v) => Some(v),
            _ => None,
        }
    }
}

impl From<BaseValue> for AnswerValue {
    fn from(value: BaseValue) -> Self {
        Self::Single(value)
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        Self::Single(BaseValue::Boolean(value))
    }
}

impl From<i64> for AnswerValue {
    fn from(value: i64) -> Self {
        Self::Single(BaseValue::Integer(value))
    }
}

impl From<i32> for AnswerValue {
    fn from(value: i32) -> Self {
        Self::Single(BaseValue::Integer(value.into()))
    }
}

impl From<f64> for AnswerValue {
    fn from(value: f64) -> Self {
        Self::Single(BaseValue::Decimal(value))
    }
}

impl From<&str> for AnswerValue {
    fn from(value: &str) -> Self {
        Self::Single(BaseValue::String(value.to_string()))
    }
}

impl From<String> for AnswerValue {
    fn from(value: String) -> Self {
        Self::Single(BaseValue::String(value))
    }
}

impl From<Time> for AnswerValue {
    fn from(value: Time) -> Self {
        Self::Single(BaseValue::Date(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_encode_rejects_mismatched_base_type() {
        let err = AnswerResultType::integer()
            .encode(&AnswerValue::from("ten"))
            .unwrap_err();
        assert!(matches!(
            err,
            ResultError::AnswerTypeMismatch {
                expected: BaseType::Integer,
                actual: BaseType::String
            }
        ));
    }

    #[test]
    fn test_encode_rejects_mismatched_sequence() {
        let answer_type = AnswerResultType::integer().with_sequence(SequenceType::Array);
        assert!(matches!(
            answer_type.encode(&AnswerValue::from(3)),
            Err(ResultError::SequenceMismatch { .. })
        ));
    }

    #[test]
    fn test_date_uses_declared_format() {
        let answer_type = AnswerResultType::date().with_date_format("%Y-%m-%d");
        let date = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap();

        let encoded = answer_type.encode(&AnswerValue::from(date)).unwrap();
        assert_eq!(encoded, json!("2021-03-14"));

        let decoded = answer_type.decode(&encoded).unwrap().unwrap();
        let expected = Utc.with_ymd_and_hms(2021, 3, 14, 0, 0, 0).unwrap();
        assert_eq!(decoded, AnswerValue::from(expected));
    }

    #[test]
    fn test_invalid_date_format_is_an_error() {
        let answer_type = AnswerResultType::date().with_date_format("%Q");
        let err = answer_type.encode(&AnswerValue::from(Utc::now())).unwrap_err();
        assert!(matches!(err, ResultError::DateFormat(format) if format == "%Q"));
    }

    #[test]
    fn test_array_with_separator_joins_values() {
        let answer_type = AnswerResultType::integer()
            .with_sequence(SequenceType::Array)
            .with_separator(",");
        let value = AnswerValue::Array(vec![BaseValue::Integer(1), BaseValue::Integer(2)]);

        let encoded = answer_type.encode(&value).unwrap();
        assert_eq!(encoded, json!("1,2"));
        assert_eq!(answer_type.decode(&encoded).unwrap(), Some(value));
    }

    #[test]
    fn test_data_is_base64() {
        let answer_type = AnswerResultType::new(BaseType::Data);
        let value = AnswerValue::Single(BaseValue::Data(vec![0xde, 0xad, 0xbe, 0xef]));

        let encoded = answer_type.encode(&value).unwrap();
        assert_eq!(encoded, json!("3q2+7w=="));
        assert_eq!(answer_type.decode(&encoded).unwrap(), Some(value));
    }

    #[test]
    fn test_decode_null_is_none() {
        assert_eq!(AnswerResultType::string().decode(&Value::Null).unwrap(), None);
    }

    #[test]
    fn test_decode_wrong_json_kind_fails() {
        assert!(AnswerResultType::boolean().decode(&json!("yes")).is_err());
        assert!(AnswerResultType::integer().decode(&json!(true)).is_err());
    }

    #[test]
    fn test_non_finite_decimal_is_rejected() {
        let err = AnswerResultType::decimal()
            .encode(&AnswerValue::from(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, ResultError::NonFinite(_)));
    }

    #[test]
    fn test_numeric_matches_across_kinds() {
        assert!(BaseValue::Integer(3).matches(&BaseValue::Decimal(3.0)));
        assert!(!BaseValue::Integer(3).matches(&BaseValue::String("3".into())));
    }
}
