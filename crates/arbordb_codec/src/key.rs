//! Indexable values and their total order.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Maximum encoded length of a string key or metadata string.
pub const MAX_STRING_LENGTH: usize = 255;

const TAG_UNDEFINED: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_BOOLEAN: u8 = 3;
const TAG_DATE: u8 = 5;

/// A primitive value that can be stored as a tree key or metadata value.
///
/// `IndexValue` is totally ordered across types:
///
/// ```text
/// undefined < number < boolean < string < date
/// ```
///
/// Within a type, numbers compare numerically (NaN after every other
/// number), booleans `false < true`, strings by code point and dates by
/// epoch milliseconds. `Eq` agrees with this order, so `-0.0 == 0.0`.
#[derive(Debug, Clone)]
pub enum IndexValue {
    /// "No value" sentinel (e.g. an empty array in an array index).
    Undefined,
    /// Number.
    Number(f64),
    /// Boolean.
    Boolean(bool),
    /// String.
    String(String),
    /// Date as epoch milliseconds.
    Date(i64),
}

impl IndexValue {
    /// Converts a record value into an indexable value.
    ///
    /// Returns `None` for null, arrays and objects. `-0` becomes `0`, so
    /// values that compare equal also encode equal.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(IndexValue::Boolean(*b)),
            Value::Number(n) if *n == 0.0 => Some(IndexValue::Number(0.0)),
            Value::Number(n) => Some(IndexValue::Number(*n)),
            Value::String(s) => Some(IndexValue::String(s.clone())),
            Value::Date(ms) => Some(IndexValue::Date(*ms)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Converts back into a record value. `Undefined` maps to null.
    pub fn to_value(&self) -> Value {
        match self {
            IndexValue::Undefined => Value::Null,
            IndexValue::Number(n) => Value::Number(*n),
            IndexValue::Boolean(b) => Value::Bool(*b),
            IndexValue::String(s) => Value::String(s.clone()),
            IndexValue::Date(ms) => Value::Date(*ms),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            IndexValue::Undefined => 0,
            IndexValue::Number(_) => 1,
            IndexValue::Boolean(_) => 2,
            IndexValue::String(_) => 3,
            IndexValue::Date(_) => 4,
        }
    }

    /// Type-aware comparison used for every key ordering decision.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::Number(a), IndexValue::Number(b)) => a
                .partial_cmp(b)
                .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan())),
            (IndexValue::Boolean(a), IndexValue::Boolean(b)) => a.cmp(b),
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            (IndexValue::Date(a), IndexValue::Date(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Returns true if this is the `Undefined` sentinel.
    pub fn is_undefined(&self) -> bool {
        matches!(self, IndexValue::Undefined)
    }

    /// Get this value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IndexValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IndexValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Encodes the value as `tag [payload]`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooLong`] for strings over 255 bytes; callers
    /// truncate before encoding.
    pub fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match self {
            IndexValue::Undefined => {
                enc.u8(TAG_UNDEFINED);
            }
            IndexValue::String(s) => {
                enc.u8(TAG_STRING).bytes8("string value", s.as_bytes())?;
            }
            IndexValue::Number(n) => {
                enc.u8(TAG_NUMBER).f64(*n);
            }
            IndexValue::Boolean(b) => {
                enc.u8(TAG_BOOLEAN).u8(u8::from(*b));
            }
            IndexValue::Date(ms) => {
                enc.u8(TAG_DATE).i64(*ms);
            }
        }
        Ok(())
    }

    /// Decodes a value written by [`IndexValue::encode`].
    pub fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let tag = dec.u8()?;
        match tag {
            TAG_UNDEFINED => Ok(IndexValue::Undefined),
            TAG_STRING => Ok(IndexValue::String(dec.str8()?)),
            TAG_NUMBER => Ok(IndexValue::Number(dec.f64()?)),
            TAG_BOOLEAN => Ok(IndexValue::Boolean(dec.u8()? != 0)),
            TAG_DATE => Ok(IndexValue::Date(dec.i64()?)),
            tag => Err(CodecError::InvalidTag { what: "key", tag }),
        }
    }

    /// Encodes into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`IndexValue::encode`].
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Undefined => f.write_str("undefined"),
            IndexValue::Number(n) => write!(f, "{n}"),
            IndexValue::Boolean(b) => write!(f, "{b}"),
            IndexValue::String(s) => f.write_str(s),
            IndexValue::Date(ms) => write!(f, "date({ms})"),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        IndexValue::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        IndexValue::String(s)
    }
}

impl From<f64> for IndexValue {
    fn from(n: f64) -> Self {
        IndexValue::Number(n)
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        IndexValue::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cross_type_order() {
        let mut values = vec![
            IndexValue::Date(0),
            IndexValue::String("a".into()),
            IndexValue::Boolean(false),
            IndexValue::Number(1e9),
            IndexValue::Undefined,
        ];
        values.sort();
        assert!(values[0].is_undefined());
        assert!(matches!(values[1], IndexValue::Number(_)));
        assert!(matches!(values[2], IndexValue::Boolean(_)));
        assert!(matches!(values[3], IndexValue::String(_)));
        assert!(matches!(values[4], IndexValue::Date(_)));
    }

    #[test]
    fn nan_and_signed_zero() {
        let nan = IndexValue::Number(f64::NAN);
        assert_eq!(nan, IndexValue::Number(f64::NAN));
        assert!(IndexValue::Number(f64::INFINITY) < nan);
        assert_eq!(IndexValue::Number(-0.0), IndexValue::Number(0.0));
    }

    #[test]
    fn signed_zero_is_canonical() {
        let negative = IndexValue::from_value(&Value::Number(-0.0)).unwrap();
        let positive = IndexValue::from_value(&Value::Number(0.0)).unwrap();
        assert_eq!(negative.to_bytes().unwrap(), positive.to_bytes().unwrap());
        assert!(negative.as_f64().unwrap().is_sign_positive());
    }

    #[test]
    fn from_value_skips_containers() {
        assert_eq!(
            IndexValue::from_value(&Value::from("x")),
            Some(IndexValue::from("x"))
        );
        assert_eq!(IndexValue::from_value(&Value::Null), None);
        assert_eq!(IndexValue::from_value(&Value::Array(vec![])), None);
        assert_eq!(IndexValue::Date(5).to_value(), Value::Date(5));
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut dec = Decoder::new(&[9]);
        assert_eq!(
            IndexValue::decode(&mut dec),
            Err(CodecError::InvalidTag { what: "key", tag: 9 })
        );
    }

    fn arb_value() -> impl Strategy<Value = IndexValue> {
        prop_oneof![
            Just(IndexValue::Undefined),
            any::<f64>().prop_map(IndexValue::Number),
            any::<bool>().prop_map(IndexValue::Boolean),
            "[a-zA-Z0-9 ]{0,40}".prop_map(IndexValue::String),
            any::<i64>().prop_map(IndexValue::Date),
        ]
    }

    proptest! {
        #[test]
        fn order_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.compare(&b), b.compare(&a).reverse());
        }

        #[test]
        fn order_is_transitive(a in arb_value(), b in arb_value(), c in arb_value()) {
            let mut sorted = [a, b, c];
            sorted.sort();
            prop_assert!(sorted[0] <= sorted[2]);
            prop_assert!(sorted[0] <= sorted[1] && sorted[1] <= sorted[2]);
        }

        #[test]
        fn encoding_preserves_value(a in arb_value()) {
            let bytes = a.to_bytes().unwrap();
            let decoded = IndexValue::decode(&mut Decoder::new(&bytes)).unwrap();
            prop_assert_eq!(decoded, a);
        }
    }
}
