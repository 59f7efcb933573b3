//! Typed values stored at registry leaves.
//!
//! The registry is strongly typed: every leaf holds exactly one of a closed
//! set of value kinds, and a typed get/set against the wrong kind is a node
//! error, not a silent coercion. Unit conversions and widenings live in the
//! per-binding reader/writer functions, never here.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SyncError};
use crate::registry::RemotePath;

/// A value held by a registry leaf.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Signed 32-bit integer.
    Long(i32),
    /// Unsigned 32-bit integer.
    ULong(u32),
    /// Signed 64-bit integer.
    LongLong(i64),
    /// Unsigned 64-bit integer.
    ULongLong(u64),
    /// Double-precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Text.
    Str(String),
    /// Unsigned 32-bit vector (spectrum leaves).
    Spectrum(Vec<u32>),
}

/// Kind tag for [`Value`], used for introspection and mismatch reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ValueKind {
    Long,
    ULong,
    LongLong,
    ULongLong,
    Double,
    Bool,
    Str,
    Spectrum,
}

impl Value {
    /// Kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Long(_) => ValueKind::Long,
            Value::ULong(_) => ValueKind::ULong,
            Value::LongLong(_) => ValueKind::LongLong,
            Value::ULongLong(_) => ValueKind::ULongLong,
            Value::Double(_) => ValueKind::Double,
            Value::Bool(_) => ValueKind::Bool,
            Value::Str(_) => ValueKind::Str,
            Value::Spectrum(_) => ValueKind::Spectrum,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Long => "long",
            ValueKind::ULong => "ulong",
            ValueKind::LongLong => "long_long",
            ValueKind::ULongLong => "ulong_long",
            ValueKind::Double => "double",
            ValueKind::Bool => "bool",
            ValueKind::Str => "string",
            ValueKind::Spectrum => "spectrum",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{v}"),
            Value::ULong(v) => write!(f, "{v}"),
            Value::LongLong(v) => write!(f, "{v}"),
            Value::ULongLong(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Spectrum(v) => {
                // Same rendering the registry daemon uses for vector leaves.
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(" "))
            }
        }
    }
}

/// Typed extraction from a registry [`Value`].
///
/// Extraction is exact: a `Long` leaf only yields `i32`. The `path` argument
/// is carried for error reporting only.
pub trait FromValue: Sized {
    /// Kind this type extracts from, for mismatch messages.
    fn expected_kind() -> ValueKind;

    /// Extract, failing with a node error on kind mismatch.
    fn from_value(value: &Value, path: &RemotePath) -> Result<Self>;
}

/// Conversion of a local value into its registry [`Value`] form.
pub trait IntoValue {
    /// Wrap into the matching [`Value`] variant.
    fn into_value(self) -> Value;
}

macro_rules! impl_value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn expected_kind() -> ValueKind {
                    ValueKind::$variant
                }

                fn from_value(value: &Value, path: &RemotePath) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v.clone()),
                        other => Err(SyncError::type_mismatch(
                            path.as_str(),
                            &ValueKind::$variant.to_string(),
                            &other.kind().to_string(),
                        )),
                    }
                }
            }

            impl IntoValue for $ty {
                fn into_value(self) -> Value {
                    Value::$variant(self)
                }
            }
        )*
    };
}

impl_value_conversions! {
    i32 => Long,
    u32 => ULong,
    i64 => LongLong,
    u64 => ULongLong,
    f64 => Double,
    bool => Bool,
    String => Str,
    Vec<u32> => Spectrum,
}
