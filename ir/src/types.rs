//! Type definitions for IR operations.
//!
//! This module contains the fundamental value and operation enums used
//! throughout the IR: constant values, ALU operation kinds, reduction kinds
//! and the tensor-core (WMMA) descriptor.

use std::hash::{Hash, Hasher};
use std::mem::discriminant;

use kernc_dtype::{DType, ScalarDType};

/// Constant value that can be stored in a UOp.
///
/// Equality and hashing are bitwise so constants can take part in
/// hash-consing. Use [`ConstValue::value_eq`] for numeric comparison.
#[derive(Debug, Clone, Copy)]
pub enum ConstValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl PartialEq for ConstValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Bool(a), Self::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ConstValue {}

impl Hash for ConstValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        discriminant(self).hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Bool(v) => v.hash(state),
        }
    }
}

impl std::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}u"),
            Self::Float(v) => write!(f, "{v:?}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ConstValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ConstValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u64> for ConstValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<usize> for ConstValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ConstValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ConstValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Cast to the target width and back to the storage type.
macro_rules! cast_via {
    ($v:expr, $target:ty, $storage:ty) => {
        ($v as $target) as $storage
    };
}

#[inline]
fn cast_int(v: i64, to: ScalarDType) -> Option<ConstValue> {
    use ScalarDType::*;
    Some(match to {
        Bool => ConstValue::Bool(v != 0),
        Int8 => ConstValue::Int(cast_via!(v, i8, i64)),
        Int16 => ConstValue::Int(cast_via!(v, i16, i64)),
        Int32 => ConstValue::Int(cast_via!(v, i32, i64)),
        Int64 | BigInt => ConstValue::Int(v),
        UInt8 => ConstValue::UInt(cast_via!(v, u8, u64)),
        UInt16 => ConstValue::UInt(cast_via!(v, u16, u64)),
        UInt32 => ConstValue::UInt(cast_via!(v, u32, u64)),
        UInt64 => ConstValue::UInt(v as u64),
        Float16 | BFloat16 | Float32 => ConstValue::Float(v as f32 as f64),
        Float64 => ConstValue::Float(v as f64),
        Void => return None,
    })
}

#[inline]
fn cast_uint(v: u64, to: ScalarDType) -> Option<ConstValue> {
    use ScalarDType::*;
    Some(match to {
        Bool => ConstValue::Bool(v != 0),
        Int8 => ConstValue::Int(cast_via!(v, i8, i64)),
        Int16 => ConstValue::Int(cast_via!(v, i16, i64)),
        Int32 => ConstValue::Int(cast_via!(v, i32, i64)),
        Int64 | BigInt => ConstValue::Int(v as i64),
        UInt8 => ConstValue::UInt(cast_via!(v, u8, u64)),
        UInt16 => ConstValue::UInt(cast_via!(v, u16, u64)),
        UInt32 => ConstValue::UInt(cast_via!(v, u32, u64)),
        UInt64 => ConstValue::UInt(v),
        Float16 | BFloat16 | Float32 => ConstValue::Float(v as f32 as f64),
        Float64 => ConstValue::Float(v as f64),
        Void => return None,
    })
}

#[inline]
fn cast_float(v: f64, to: ScalarDType) -> Option<ConstValue> {
    use ScalarDType::*;
    Some(match to {
        Bool => ConstValue::Bool(v != 0.0),
        Int8 => ConstValue::Int(cast_via!(v, i8, i64)),
        Int16 => ConstValue::Int(cast_via!(v, i16, i64)),
        Int32 => ConstValue::Int(cast_via!(v, i32, i64)),
        Int64 | BigInt => ConstValue::Int(v as i64),
        UInt8 => ConstValue::UInt(cast_via!(v, u8, u64)),
        UInt16 => ConstValue::UInt(cast_via!(v, u16, u64)),
        UInt32 => ConstValue::UInt(cast_via!(v, u32, u64)),
        UInt64 => ConstValue::UInt(v as u64),
        // half and bfloat16 are carried at single precision
        Float16 | BFloat16 | Float32 => ConstValue::Float(v as f32 as f64),
        Float64 => ConstValue::Float(v),
        Void => return None,
    })
}

impl ConstValue {
    pub const fn zero(dtype: ScalarDType) -> Self {
        use ScalarDType::*;
        match dtype {
            Bool => Self::Bool(false),
            Int8 | Int16 | Int32 | Int64 | BigInt | Void => Self::Int(0),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(0),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(0.0),
        }
    }

    pub const fn one(dtype: ScalarDType) -> Self {
        use ScalarDType::*;
        match dtype {
            Bool => Self::Bool(true),
            Int8 | Int16 | Int32 | Int64 | BigInt | Void => Self::Int(1),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(1),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(1.0),
        }
    }

    /// Smallest representable value, the identity of a MAX reduction.
    pub const fn min_of(dtype: ScalarDType) -> Self {
        use ScalarDType::*;
        match dtype {
            Bool => Self::Bool(false),
            Int8 => Self::Int(i8::MIN as i64),
            Int16 => Self::Int(i16::MIN as i64),
            Int32 => Self::Int(i32::MIN as i64),
            Int64 | BigInt | Void => Self::Int(i64::MIN),
            UInt8 | UInt16 | UInt32 | UInt64 => Self::UInt(0),
            Float16 | BFloat16 | Float32 | Float64 => Self::Float(f64::NEG_INFINITY),
        }
    }

    /// Normalize this value to `dtype`.
    ///
    /// Vectors normalize to their element type. Integer narrowing wraps,
    /// float to integer truncates toward zero, floats narrower than f64 are
    /// rounded to single precision. Returns `None` for pointers, images and
    /// void.
    pub fn cast(&self, dtype: &DType) -> Option<Self> {
        let to = match dtype {
            DType::Scalar(s) => *s,
            DType::Vector { scalar, .. } => *scalar,
            _ => return None,
        };
        match *self {
            Self::Bool(v) => cast_int(v as i64, to),
            Self::Int(v) => cast_int(v, to),
            Self::UInt(v) => cast_uint(v, to),
            Self::Float(v) => cast_float(v, to),
        }
    }

    /// Numeric equality across representations (`0 == 0.0 == false`).
    pub fn value_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(_), _) | (_, Self::Float(_)) => self.as_f64() == other.as_f64(),
            _ => self.as_i128() == other.as_i128(),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
            Self::Bool(v) => v as u8 as f64,
        }
    }

    fn as_i128(&self) -> i128 {
        match *self {
            Self::Int(v) => v as i128,
            Self::UInt(v) => v as i128,
            Self::Float(v) => v as i128,
            Self::Bool(v) => v as i128,
        }
    }

    /// Integer view of the value, `None` for floats.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            Self::UInt(v) => i64::try_from(v).ok(),
            Self::Bool(v) => Some(v as i64),
            Self::Float(_) => None,
        }
    }

    /// Truthiness as a C condition would see it.
    pub fn truthy(&self) -> bool {
        match *self {
            Self::Int(v) => v != 0,
            Self::UInt(v) => v != 0,
            Self::Float(v) => v != 0.0,
            Self::Bool(v) => v,
        }
    }

    pub fn is_nan_or_inf(&self) -> bool {
        matches!(*self, Self::Float(v) if !v.is_finite())
    }
}

/// Unary operation types. All of them preserve the input dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum UnaryOp {
    Neg,
    Exp2,
    Log2,
    Sin,
    Sqrt,
    Recip,
}

/// Binary operation types.
///
/// Comparisons return bool, everything else preserves the lhs dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Integer division, truncated toward zero (C semantics).
    Idiv,
    /// IEEE float division.
    Fdiv,
    Max,
    /// Remainder with the sign of the dividend (C semantics).
    Mod,
    CmpLt,
    CmpNe,
    Xor,
    And,
    Or,
    Shl,
    Shr,
    /// Threefry2x32 mixing of a 64-bit counter with a seed.
    Threefry,
}

impl BinaryOp {
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Max | Self::CmpNe | Self::Xor | Self::And | Self::Or)
    }

    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::CmpLt | Self::CmpNe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TernaryOp {
    /// `cond ? a : b`
    Where,
    /// `a * b + c`
    MulAcc,
}

/// Reduction operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    /// The binary op folding two partial results.
    pub const fn alu(self) -> BinaryOp {
        match self {
            Self::Sum => BinaryOp::Add,
            Self::Max => BinaryOp::Max,
        }
    }

    /// Identity element of this reduction for `dtype`.
    pub const fn identity(self, dtype: ScalarDType) -> ConstValue {
        match self {
            Self::Sum => ConstValue::zero(dtype),
            Self::Max => ConstValue::min_of(dtype),
        }
    }
}

/// Tensor-core (warp matrix multiply-accumulate) descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WmmaArg {
    /// Instruction name, e.g. `WMMA_8_8_8_float_float`.
    pub name: String,
    /// Tile dimensions (N, M, K).
    pub dims: [usize; 3],
    pub dtype_in: DType,
    pub dtype_out: DType,
    /// Per-thread element counts of the A, B and C operands.
    pub sizes: [usize; 3],
    pub device: String,
    /// Upcast axis carrying the A, B and C operand lanes.
    pub upcast_axes: [usize; 3],
    /// Axes the instruction reduces over.
    pub reduce_axes: Vec<usize>,
}
