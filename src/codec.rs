//! # Value Codec
//!
//! Parameters and signals are stored as typed cells, one [`AtomicU64`]
//! word per element. The framework itself only ever speaks `f64`; a
//! [`ValueCodec`] converts between the two given the element's [`TypeTag`].
//!
//! Atomic cells make every element read and write tear-free on its own.
//! Consistency across a whole parameter set is the parameter store's job,
//! not the codec's.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CodecError, SpecError};

/// One storage element.
pub type Cell = AtomicU64;

/// Allocate `len` zeroed cells.
pub fn cells(len: usize) -> Box<[Cell]> {
    (0..len).map(|_| AtomicU64::new(0)).collect()
}

/// Copy `src` into `dst` element by element. Both slices must be laid out
/// identically; extra cells on either side are ignored.
pub fn copy_cells(dst: &[Cell], src: &[Cell]) {
    for (d, s) in dst.iter().zip(src.iter()) {
        d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Type tags
// ---------------------------------------------------------------------------

/// Element data type of a parameter or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Double,
    Single,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Boolean,
    /// A user-defined type understood only by a custom codec.
    Custom(u16),
}

impl TypeTag {
    /// Numeric data type id as reported in parameter and signal specs.
    pub const fn code(self) -> i32 {
        match self {
            TypeTag::Double => 0,
            TypeTag::Single => 1,
            TypeTag::Int8 => 2,
            TypeTag::UInt8 => 3,
            TypeTag::Int16 => 4,
            TypeTag::UInt16 => 5,
            TypeTag::Int32 => 6,
            TypeTag::UInt32 => 7,
            TypeTag::Boolean => 8,
            TypeTag::Custom(id) => 100 + id as i32,
        }
    }
}

impl FromStr for TypeTag {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "double" => Ok(TypeTag::Double),
            "single" | "float" => Ok(TypeTag::Single),
            "int8" => Ok(TypeTag::Int8),
            "uint8" => Ok(TypeTag::UInt8),
            "int16" => Ok(TypeTag::Int16),
            "uint16" => Ok(TypeTag::UInt16),
            "int" | "int32" => Ok(TypeTag::Int32),
            "uint32" => Ok(TypeTag::UInt32),
            "bool" | "boolean" => Ok(TypeTag::Boolean),
            other => Err(SpecError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Double => f.write_str("double"),
            TypeTag::Single => f.write_str("single"),
            TypeTag::Int8 => f.write_str("int8"),
            TypeTag::UInt8 => f.write_str("uint8"),
            TypeTag::Int16 => f.write_str("int16"),
            TypeTag::UInt16 => f.write_str("uint16"),
            TypeTag::Int32 => f.write_str("int32"),
            TypeTag::UInt32 => f.write_str("uint32"),
            TypeTag::Boolean => f.write_str("boolean"),
            TypeTag::Custom(id) => write!(f, "custom{}", id),
        }
    }
}

// ---------------------------------------------------------------------------
// Codec capability
// ---------------------------------------------------------------------------

/// Converts between a typed storage cell and a generic `f64`.
///
/// `storage` is the full cell slice of one parameter (or signal) on one
/// side; `element` indexes into it. Callers bounds-check `element` against
/// the registered width before calling.
pub trait ValueCodec: Send + Sync {
    /// Read one element as `f64`. Unknown types decode to NaN.
    fn decode(&self, storage: &[Cell], element: usize, tag: TypeTag) -> f64;

    /// Store `value` into one element.
    fn encode(
        &self,
        storage: &[Cell],
        element: usize,
        tag: TypeTag,
        value: f64,
    ) -> Result<(), CodecError>;
}

/// Codec for the built-in numeric types. Integers truncate toward zero and
/// saturate at the type's range; non-finite values are rejected for
/// integer and boolean cells.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCodec;

impl NativeCodec {
    fn pack(tag: TypeTag, value: f64) -> Result<u64, CodecError> {
        let integral = || {
            if value.is_finite() {
                Ok(value)
            } else {
                Err(CodecError::NotRepresentable { value, tag })
            }
        };

        let raw = match tag {
            TypeTag::Double => value.to_bits(),
            TypeTag::Single => (value as f32).to_bits() as u64,
            TypeTag::Int8 => integral()? as i8 as u8 as u64,
            TypeTag::UInt8 => integral()? as u8 as u64,
            TypeTag::Int16 => integral()? as i16 as u16 as u64,
            TypeTag::UInt16 => integral()? as u16 as u64,
            TypeTag::Int32 => integral()? as i32 as u32 as u64,
            TypeTag::UInt32 => integral()? as u32 as u64,
            TypeTag::Boolean => (integral()? != 0.0) as u64,
            TypeTag::Custom(_) => return Err(CodecError::Unsupported(tag)),
        };
        Ok(raw)
    }

    fn unpack(tag: TypeTag, raw: u64) -> f64 {
        match tag {
            TypeTag::Double => f64::from_bits(raw),
            TypeTag::Single => f32::from_bits(raw as u32) as f64,
            TypeTag::Int8 => raw as u8 as i8 as f64,
            TypeTag::UInt8 => raw as u8 as f64,
            TypeTag::Int16 => raw as u16 as i16 as f64,
            TypeTag::UInt16 => raw as u16 as f64,
            TypeTag::Int32 => raw as u32 as i32 as f64,
            TypeTag::UInt32 => raw as u32 as f64,
            TypeTag::Boolean => (raw != 0) as u8 as f64,
            TypeTag::Custom(_) => f64::NAN,
        }
    }
}

impl ValueCodec for NativeCodec {
    fn decode(&self, storage: &[Cell], element: usize, tag: TypeTag) -> f64 {
        match storage.get(element) {
            Some(cell) => Self::unpack(tag, cell.load(Ordering::Relaxed)),
            None => f64::NAN,
        }
    }

    fn encode(
        &self,
        storage: &[Cell],
        element: usize,
        tag: TypeTag,
        value: f64,
    ) -> Result<(), CodecError> {
        let raw = Self::pack(tag, value)?;
        match storage.get(element) {
            Some(cell) => {
                cell.store(raw, Ordering::Relaxed);
                Ok(())
            }
            None => Err(CodecError::NotRepresentable { value, tag }),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn store_and_load(tag: TypeTag, value: f64) -> f64 {
        let storage = cells(1);
        NativeCodec.encode(&storage, 0, tag, value).unwrap();
        NativeCodec.decode(&storage, 0, tag)
    }

    #[test]
    fn test_double_is_exact() {
        assert_eq!(store_and_load(TypeTag::Double, 0.1), 0.1);
        assert_eq!(store_and_load(TypeTag::Double, -1.0e300), -1.0e300);
    }

    #[test]
    fn test_integers_truncate_toward_zero() {
        assert_eq!(store_and_load(TypeTag::Int32, 7.9), 7.0);
        assert_eq!(store_and_load(TypeTag::Int32, -7.9), -7.0);
        assert_eq!(store_and_load(TypeTag::Int16, -300.0), -300.0);
    }

    #[test]
    fn test_integers_saturate() {
        assert_eq!(store_and_load(TypeTag::UInt8, 300.0), 255.0);
        assert_eq!(store_and_load(TypeTag::UInt8, -3.0), 0.0);
        assert_eq!(store_and_load(TypeTag::Int8, -1000.0), -128.0);
    }

    #[test]
    fn test_boolean() {
        assert_eq!(store_and_load(TypeTag::Boolean, 0.0), 0.0);
        assert_eq!(store_and_load(TypeTag::Boolean, -2.5), 1.0);
    }

    #[test]
    fn test_non_finite_rejected_for_integers() {
        let storage = cells(1);
        let err = NativeCodec
            .encode(&storage, 0, TypeTag::Int32, f64::NAN)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::NotRepresentable {
                tag: TypeTag::Int32,
                ..
            }
        ));
        // Floating types carry NaN through
        assert!(store_and_load(TypeTag::Single, f64::NAN).is_nan());
    }

    #[test]
    fn test_custom_type_unsupported() {
        let storage = cells(1);
        assert_eq!(
            NativeCodec.encode(&storage, 0, TypeTag::Custom(3), 1.0),
            Err(CodecError::Unsupported(TypeTag::Custom(3)))
        );
        assert!(NativeCodec.decode(&storage, 0, TypeTag::Custom(3)).is_nan());
    }

    #[test]
    fn test_type_names() {
        assert_eq!("int".parse::<TypeTag>().unwrap(), TypeTag::Int32);
        assert_eq!("double".parse::<TypeTag>().unwrap(), TypeTag::Double);
        assert_eq!("float".parse::<TypeTag>().unwrap(), TypeTag::Single);
        assert!("complex".parse::<TypeTag>().is_err());
        assert_eq!(TypeTag::Int32.to_string(), "int32");
    }

    #[test]
    fn test_copy_cells() {
        let a = cells(3);
        let b = cells(3);
        for (i, cell) in a.iter().enumerate() {
            cell.store(i as u64 + 1, Ordering::Relaxed);
        }
        copy_cells(&b, &a);
        let copied: Vec<u64> = b.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        assert_eq!(copied, vec![1, 2, 3]);
    }
}
