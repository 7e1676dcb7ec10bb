use alloc::string::String;
use alloc::vec::Vec;

use crate::sdo::errors::AbortCode;

/// CiA 301 static data types.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataType {
    Boolean,
    Integer8,
    Integer16,
    Integer32,
    Integer64,
    Unsigned8,
    Unsigned16,
    Unsigned32,
    Unsigned64,
    Real32,
    Real64,
    VisibleString,
    OctetString,
    UnicodeString,
    Domain,
}

impl DataType {
    /// Fixed byte width of the scalar types, `None` for the variable sized ones.
    pub const fn size(self) -> Option<usize> {
        match self {
            DataType::Boolean | DataType::Integer8 | DataType::Unsigned8 => Some(1),
            DataType::Integer16 | DataType::Unsigned16 => Some(2),
            DataType::Integer32 | DataType::Unsigned32 | DataType::Real32 => Some(4),
            DataType::Integer64 | DataType::Unsigned64 | DataType::Real64 => Some(8),
            DataType::VisibleString
            | DataType::OctetString
            | DataType::UnicodeString
            | DataType::Domain => None,
        }
    }
}

/// A decoded dictionary value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer8(i8),
    Integer16(i16),
    Integer32(i32),
    Integer64(i64),
    Unsigned8(u8),
    Unsigned16(u16),
    Unsigned32(u32),
    Unsigned64(u64),
    Real32(f32),
    Real64(f64),
    VisibleString(String),
    OctetString(Vec<u8>),
    UnicodeString(String),
    Domain(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer8(_) => DataType::Integer8,
            Value::Integer16(_) => DataType::Integer16,
            Value::Integer32(_) => DataType::Integer32,
            Value::Integer64(_) => DataType::Integer64,
            Value::Unsigned8(_) => DataType::Unsigned8,
            Value::Unsigned16(_) => DataType::Unsigned16,
            Value::Unsigned32(_) => DataType::Unsigned32,
            Value::Unsigned64(_) => DataType::Unsigned64,
            Value::Real32(_) => DataType::Real32,
            Value::Real64(_) => DataType::Real64,
            Value::VisibleString(_) => DataType::VisibleString,
            Value::OctetString(_) => DataType::OctetString,
            Value::UnicodeString(_) => DataType::UnicodeString,
            Value::Domain(_) => DataType::Domain,
        }
    }

    /// Decode little-endian raw bytes as `data_type`.
    pub fn from_raw(raw: &[u8], data_type: DataType) -> Result<Value, AbortCode> {
        fn bytes<const N: usize>(raw: &[u8]) -> Result<[u8; N], AbortCode> {
            raw.try_into().map_err(|_| AbortCode::InvalidValue)
        }

        Ok(match data_type {
            DataType::Boolean => match raw {
                [0] => Value::Boolean(false),
                [1] => Value::Boolean(true),
                _ => return Err(AbortCode::InvalidValue),
            },
            DataType::Integer8 => Value::Integer8(i8::from_le_bytes(bytes(raw)?)),
            DataType::Integer16 => Value::Integer16(i16::from_le_bytes(bytes(raw)?)),
            DataType::Integer32 => Value::Integer32(i32::from_le_bytes(bytes(raw)?)),
            DataType::Integer64 => Value::Integer64(i64::from_le_bytes(bytes(raw)?)),
            DataType::Unsigned8 => Value::Unsigned8(u8::from_le_bytes(bytes(raw)?)),
            DataType::Unsigned16 => Value::Unsigned16(u16::from_le_bytes(bytes(raw)?)),
            DataType::Unsigned32 => Value::Unsigned32(u32::from_le_bytes(bytes(raw)?)),
            DataType::Unsigned64 => Value::Unsigned64(u64::from_le_bytes(bytes(raw)?)),
            DataType::Real32 => Value::Real32(f32::from_le_bytes(bytes(raw)?)),
            DataType::Real64 => Value::Real64(f64::from_le_bytes(bytes(raw)?)),
            DataType::VisibleString => Value::VisibleString(
                core::str::from_utf8(raw)
                    .map_err(|_| AbortCode::InvalidValue)?
                    .into(),
            ),
            DataType::OctetString => Value::OctetString(raw.to_vec()),
            DataType::UnicodeString => {
                if raw.len() % 2 != 0 {
                    return Err(AbortCode::InvalidValue);
                }
                let units = raw
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
                let decoded: Result<String, _> = char::decode_utf16(units).collect();
                Value::UnicodeString(decoded.map_err(|_| AbortCode::InvalidValue)?)
            }
            DataType::Domain => Value::Domain(raw.to_vec()),
        })
    }

    /// Encode as little-endian raw bytes.
    pub fn to_raw(&self) -> Vec<u8> {
        match self {
            Value::Boolean(value) => vec![*value as u8],
            Value::Integer8(value) => value.to_le_bytes().to_vec(),
            Value::Integer16(value) => value.to_le_bytes().to_vec(),
            Value::Integer32(value) => value.to_le_bytes().to_vec(),
            Value::Integer64(value) => value.to_le_bytes().to_vec(),
            Value::Unsigned8(value) => value.to_le_bytes().to_vec(),
            Value::Unsigned16(value) => value.to_le_bytes().to_vec(),
            Value::Unsigned32(value) => value.to_le_bytes().to_vec(),
            Value::Unsigned64(value) => value.to_le_bytes().to_vec(),
            Value::Real32(value) => value.to_le_bytes().to_vec(),
            Value::Real64(value) => value.to_le_bytes().to_vec(),
            Value::VisibleString(value) => value.as_bytes().to_vec(),
            Value::OctetString(value) | Value::Domain(value) => value.clone(),
            Value::UnicodeString(value) => value
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
        }
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer8(value) => Some(*value as i128),
            Value::Integer16(value) => Some(*value as i128),
            Value::Integer32(value) => Some(*value as i128),
            Value::Integer64(value) => Some(*value as i128),
            Value::Unsigned8(value) => Some(*value as i128),
            Value::Unsigned16(value) => Some(*value as i128),
            Value::Unsigned32(value) => Some(*value as i128),
            Value::Unsigned64(value) => Some(*value as i128),
            _ => None,
        }
    }

    fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real32(value) => Some(*value as f64),
            Value::Real64(value) => Some(*value),
            _ => None,
        }
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<core::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_integer(), b.as_integer()) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_real(), b.as_real()) {
        return a.partial_cmp(&b);
    }
    None
}

/// Compare a decoded write against an entry's limit fields.
pub(crate) fn check_limits(
    value: &Value,
    low: Option<&Value>,
    high: Option<&Value>,
) -> Result<(), AbortCode> {
    use core::cmp::Ordering;

    if let Some(high) = high {
        if numeric_cmp(value, high) == Some(Ordering::Greater) {
            return Err(AbortCode::ValueTooHigh);
        }
    }
    if let Some(low) = low {
        if numeric_cmp(value, low) == Some(Ordering::Less) {
            return Err(AbortCode::ValueTooLow);
        }
    }
    Ok(())
}
