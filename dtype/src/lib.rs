//! Element types for the kernel compiler.
//!
//! A [`DType`] describes what a single IR value holds: a scalar, a fixed-width
//! vector of scalars, a pointer into a buffer, or a 2-D image handle whose
//! texels are four-wide.

#[cfg(feature = "proptest")]
pub mod proptest_gen;

#[cfg(test)]
pub mod test;

use std::fmt;

/// Address space for pointer types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum AddrSpace {
    /// Global/device memory.
    Global,
    /// Local/shared memory.
    Local,
}

/// Image type kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ImageKind {
    /// Half precision image.
    Half,
    /// Float precision image.
    Float,
}

/// Scalar data types (base numeric types).
#[derive(Debug, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[derive(enumset::EnumSetType)]
#[derive(serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[enumset(repr = "u32")]
pub enum ScalarDType {
    Bool = 0,

    Int8 = 1,
    UInt8 = 2,
    Int16 = 3,
    UInt16 = 4,
    Int32 = 5,
    UInt32 = 6,
    Int64 = 7,
    UInt64 = 8,

    Float16 = 9,
    BFloat16 = 10,
    Float32 = 11,
    Float64 = 12,

    /// Void type for control operations (no data).
    Void = 13,

    /// Oversized integer used while index expressions are being built.
    ///
    /// Folding narrows it to [`ScalarDType::Int32`] once the expression is final.
    BigInt = 14,
}

/// Data type including scalars, vectors, pointers, and images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum DType {
    /// Scalar type (single value).
    Scalar(ScalarDType),

    /// Vector type (SIMD).
    Vector { scalar: ScalarDType, count: usize },

    /// Pointer type.
    Ptr { base: Box<DType>, addrspace: AddrSpace },

    /// Image type, `shape` is `[height, width, 4]`.
    Image { kind: ImageKind, shape: Vec<usize> },
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 => 8,
            Self::UInt8 => 1,
            Self::UInt16 => 2,
            Self::UInt32 => 4,
            Self::UInt64 => 8,
            Self::Float16 => 2,
            Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
            Self::Void => 0,
            Self::BigInt => 8,
        }
    }

    /// Width in bits, used for integer wrap-around.
    pub const fn bits(&self) -> u32 {
        (self.bytes() * 8) as u32
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::BigInt)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }

    pub const fn c_style(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "signed char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::UInt8 => "unsigned char",
            Self::UInt16 => "unsigned short",
            Self::UInt32 => "unsigned int",
            Self::UInt64 => "unsigned long",
            Self::Float16 => "half",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::BFloat16 => "__bf16",
            Self::Void => "void",
            Self::BigInt => "long long",
        }
    }

    /// Short name used in kernel and tensor-core identifiers.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::UInt8 => "uchar",
            Self::UInt16 => "ushort",
            Self::UInt32 => "uint",
            Self::UInt64 => "ulong",
            Self::Float16 => "half",
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Void => "void",
            Self::BigInt => "bigint",
        }
    }
}

impl From<ScalarDType> for DType {
    fn from(scalar: ScalarDType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    // =========================================================================
    // Type Constructors
    // =========================================================================

    /// Create a vector type from this dtype.
    ///
    /// A count of one returns the scalar itself. Vectors, pointers and images
    /// are returned unchanged.
    pub fn vec(&self, count: usize) -> Self {
        match self {
            Self::Scalar(s) if count > 1 && !matches!(s, ScalarDType::Void) => Self::Vector { scalar: *s, count },
            _ => self.clone(),
        }
    }

    /// Create a pointer type from this dtype.
    pub fn ptr(&self, addrspace: AddrSpace) -> Self {
        match self {
            Self::Ptr { .. } => self.clone(),
            _ => Self::Ptr { base: Box::new(self.clone()), addrspace },
        }
    }

    /// Image dtype with the given `[height, width]` texel grid.
    pub fn image(kind: ImageKind, height: usize, width: usize) -> Self {
        Self::Image { kind, shape: vec![height, width, 4] }
    }

    pub fn scalar(&self) -> Option<ScalarDType> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// The scalar element type with vector width dropped.
    pub fn scalar_dtype(&self) -> DType {
        match self {
            Self::Vector { scalar, .. } => Self::Scalar(*scalar),
            Self::Image { .. } => Self::Scalar(self.base()),
            _ => self.clone(),
        }
    }

    /// Check if this is a vector type.
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, Self::Ptr { .. })
    }

    /// Get the base scalar type (works for scalars, vectors, pointers and images).
    pub fn base(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) => *s,
            Self::Vector { scalar, .. } => *scalar,
            Self::Ptr { base, .. } => base.base(),
            Self::Image { kind: ImageKind::Half, .. } => ScalarDType::Float16,
            Self::Image { kind: ImageKind::Float, .. } => ScalarDType::Float32,
        }
    }

    /// Get the vector count (1 for scalars).
    pub fn count(&self) -> usize {
        match self {
            Self::Vector { count, .. } => *count,
            _ => 1,
        }
    }

    /// Pointee type of a pointer, `None` for anything else.
    pub fn pointee(&self) -> Option<&DType> {
        match self {
            Self::Ptr { base, .. } => Some(base),
            _ => None,
        }
    }

    /// Image `[height, width, 4]` shape, `None` for anything else.
    pub fn image_shape(&self) -> Option<&[usize]> {
        match self {
            Self::Image { shape, .. } => Some(shape),
            _ => None,
        }
    }

    // =========================================================================
    // Type Properties
    // =========================================================================

    /// Size of one element in bytes.
    ///
    /// Images report the size of a single texel channel.
    pub fn bytes(&self) -> usize {
        match self {
            Self::Scalar(s) => s.bytes(),
            Self::Vector { scalar, count } => scalar.bytes() * count,
            Self::Ptr { .. } => 8,
            Self::Image { .. } => self.base().bytes(),
        }
    }

    pub fn is_bool(&self) -> bool {
        self.base().is_bool() && !self.is_ptr()
    }

    pub fn is_signed(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_signed())
    }

    pub fn is_unsigned(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_unsigned())
    }

    pub fn is_int(&self) -> bool {
        self.scalar().is_some_and(|s| s.is_int())
    }

    /// True for float scalars and float vectors.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Vector { .. }) && self.base().is_float()
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Scalar(ScalarDType::Void))
    }

    pub fn c_style(&self) -> String {
        match self {
            Self::Scalar(s) => s.c_style().to_string(),
            Self::Vector { scalar, count } => format!("{}{}", scalar.name(), count),
            Self::Ptr { base, addrspace } => {
                let addr_str = match addrspace {
                    AddrSpace::Global => "__global",
                    AddrSpace::Local => "__local",
                };
                format!("{} {}*", addr_str, base.c_style())
            }
            Self::Image { .. } => "image2d_t".to_string(),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{}", s.name()),
            Self::Vector { scalar, count } => write!(f, "{}.vec({count})", scalar.name()),
            Self::Ptr { base, addrspace: AddrSpace::Global } => write!(f, "ptr.{base}"),
            Self::Ptr { base, addrspace: AddrSpace::Local } => write!(f, "local_ptr.{base}"),
            Self::Image { kind, shape } => {
                let k = match kind {
                    ImageKind::Half => "imageh",
                    ImageKind::Float => "imagef",
                };
                write!(f, "{k}{shape:?}")
            }
        }
    }
}

#[allow(non_upper_case_globals)]
impl DType {
    pub const Bool: Self = Self::Scalar(ScalarDType::Bool);
    pub const Int8: Self = Self::Scalar(ScalarDType::Int8);
    pub const Int16: Self = Self::Scalar(ScalarDType::Int16);
    pub const Int32: Self = Self::Scalar(ScalarDType::Int32);
    pub const Int64: Self = Self::Scalar(ScalarDType::Int64);
    pub const UInt8: Self = Self::Scalar(ScalarDType::UInt8);
    pub const UInt16: Self = Self::Scalar(ScalarDType::UInt16);
    pub const UInt32: Self = Self::Scalar(ScalarDType::UInt32);
    pub const UInt64: Self = Self::Scalar(ScalarDType::UInt64);
    pub const Float16: Self = Self::Scalar(ScalarDType::Float16);
    pub const BFloat16: Self = Self::Scalar(ScalarDType::BFloat16);
    pub const Float32: Self = Self::Scalar(ScalarDType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarDType::Float64);
    pub const Void: Self = Self::Scalar(ScalarDType::Void);
    pub const BigInt: Self = Self::Scalar(ScalarDType::BigInt);
}
