//! Element types of shared memory views.
//!
//! A view over a mapped region is described by a base address, an element
//! count and an [`ElementType`]. The byte width of each type (the size
//! table) is the only place element counts and byte sizes are converted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical element type of a shared memory view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementType {
    /// Raw byte buffer
    #[serde(rename = "Buffer")]
    Buffer = 0,
    /// Signed 8-bit integers
    #[serde(rename = "Int8Array")]
    Int8 = 1,
    /// Unsigned 8-bit integers
    #[serde(rename = "Uint8Array")]
    Uint8 = 2,
    /// Unsigned 8-bit integers, clamped on store
    #[serde(rename = "Uint8ClampedArray")]
    Uint8Clamped = 3,
    /// Signed 16-bit integers
    #[serde(rename = "Int16Array")]
    Int16 = 4,
    /// Unsigned 16-bit integers
    #[serde(rename = "Uint16Array")]
    Uint16 = 5,
    /// Signed 32-bit integers
    #[serde(rename = "Int32Array")]
    Int32 = 6,
    /// Unsigned 32-bit integers
    #[serde(rename = "Uint32Array")]
    Uint32 = 7,
    /// 32-bit floats
    #[serde(rename = "Float32Array")]
    Float32 = 8,
    /// 64-bit floats
    #[serde(rename = "Float64Array")]
    #[default]
    Float64 = 9,
}

impl ElementType {
    /// Every element type, in tag order.
    pub const ALL: [ElementType; 10] = [
        Self::Buffer,
        Self::Int8,
        Self::Uint8,
        Self::Uint8Clamped,
        Self::Int16,
        Self::Uint16,
        Self::Int32,
        Self::Uint32,
        Self::Float32,
        Self::Float64,
    ];

    /// Byte width of one element.
    #[inline]
    pub const fn width(self) -> usize {
        match self {
            Self::Buffer | Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Convert from the raw tag. Returns `None` for unknown tags.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Buffer),
            1 => Some(Self::Int8),
            2 => Some(Self::Uint8),
            3 => Some(Self::Uint8Clamped),
            4 => Some(Self::Int16),
            5 => Some(Self::Uint16),
            6 => Some(Self::Int32),
            7 => Some(Self::Uint32),
            8 => Some(Self::Float32),
            9 => Some(Self::Float64),
            _ => None,
        }
    }

    /// Type name as exposed to hosts (`"Float64Array"`, `"Buffer"`, ...).
    pub const fn name(self) -> &'static str {
        match self {
            Self::Buffer => "Buffer",
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Uint8Clamped => "Uint8ClampedArray",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }

    /// Byte size of `count` elements, `None` on overflow.
    #[inline]
    pub const fn byte_len(self, count: usize) -> Option<usize> {
        count.checked_mul(self.width())
    }

    /// Number of whole elements that fit in `bytes`.
    #[inline]
    pub const fn count_for(self, bytes: usize) -> usize {
        bytes / self.width()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown element type name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown element type: {0}")]
pub struct UnknownElementType(pub String);

impl FromStr for ElementType {
    type Err = UnknownElementType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| UnknownElementType(s.to_string()))
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that may back a typed view.
///
/// Implemented for the primitive types matching [`ElementType`]; sealed so
/// the width table cannot be extended from outside.
pub trait Element: Copy + sealed::Sealed + 'static {
    /// Element types this scalar can view.
    const TYPES: &'static [ElementType];
}

macro_rules! impl_element {
    ($($ty:ty => [$($tag:ident),+]),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}
            impl Element for $ty {
                const TYPES: &'static [ElementType] = &[$(ElementType::$tag),+];
            }
        )*
    };
}

impl_element! {
    u8 => [Buffer, Uint8, Uint8Clamped],
    i8 => [Int8],
    i16 => [Int16],
    u16 => [Uint16],
    i32 => [Int32],
    u32 => [Uint32],
    f32 => [Float32],
    f64 => [Float64],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_match_scalar_sizes() {
        assert_eq!(ElementType::Buffer.width(), 1);
        assert_eq!(ElementType::Uint8Clamped.width(), 1);
        assert_eq!(ElementType::Int16.width(), core::mem::size_of::<i16>());
        assert_eq!(ElementType::Uint32.width(), core::mem::size_of::<u32>());
        assert_eq!(ElementType::Float32.width(), core::mem::size_of::<f32>());
        assert_eq!(ElementType::Float64.width(), core::mem::size_of::<f64>());
    }

    #[test]
    fn tag_roundtrip() {
        for ty in ElementType::ALL {
            assert_eq!(ElementType::from_u8(ty as u8), Some(ty));
        }
        assert!(ElementType::from_u8(10).is_none());
        assert!(ElementType::from_u8(255).is_none());
    }

    #[test]
    fn parse_names() {
        assert_eq!("Float64Array".parse::<ElementType>(), Ok(ElementType::Float64));
        assert_eq!("Buffer".parse::<ElementType>(), Ok(ElementType::Buffer));
        assert!("Float16Array".parse::<ElementType>().is_err());
    }

    #[test]
    fn byte_len_overflow() {
        assert_eq!(ElementType::Float64.byte_len(256), Some(2048));
        assert_eq!(ElementType::Float64.byte_len(usize::MAX), None);
    }

    #[test]
    fn scalar_element_tables() {
        assert!(<u8 as Element>::TYPES.contains(&ElementType::Buffer));
        assert!(<f64 as Element>::TYPES.contains(&ElementType::Float64));
        assert!(!<f32 as Element>::TYPES.contains(&ElementType::Float64));
    }
}
