//! Opaque tensors exchanged between actors and learners.
//!
//! The substrate never interprets tensor contents. A [`TensorBlob`] is a
//! shape, an element type and a little-endian byte buffer. The only
//! operations it supports are validation, typed views for tests and
//! interop, and stacking along a new leading axis when batches are built.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a [`TensorBlob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U8,
    /// One byte per element, 0 or 1.
    Bool,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 | DType::Bool => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Errors raised while building or combining tensors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TensorError {
    #[error("byte length {actual} does not match shape {shape:?} of {dtype} (expected {expected})")]
    ByteLength {
        shape: Vec<usize>,
        dtype: DType,
        expected: usize,
        actual: usize,
    },

    #[error("expected dtype {expected}, found {actual}")]
    DTypeMismatch { expected: DType, actual: DType },

    #[error("expected shape {expected:?}, found {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("expected rank {expected}, found rank {actual}")]
    Rank { expected: usize, actual: usize },

    #[error("no {field} tensor at index {index}")]
    MissingField { field: &'static str, index: usize },

    #[error("cannot stack an empty list of tensors")]
    EmptyStack,

    #[error("tensor conversion failed: {0}")]
    Conversion(String),
}

/// Shape and dtype of a tensor, without its contents.
///
/// Two tensors can be stacked into one batch iff their signatures are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSignature {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl fmt::Display for TensorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that map onto a [`DType`].
pub trait Element: Copy + sealed::Sealed {
    const DTYPE: DType;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

impl_element!(f32, DType::F32);
impl_element!(f64, DType::F64);
impl_element!(i32, DType::I32);
impl_element!(i64, DType::I64);
impl_element!(u8, DType::U8);

/// Opaque n-dimensional array: shape, dtype and raw little-endian bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorBlob {
    shape: Vec<usize>,
    dtype: DType,
    bytes: Vec<u8>,
}

impl TensorBlob {
    /// Wrap raw bytes, checking that their length matches `shape` and `dtype`.
    pub fn new(shape: Vec<usize>, dtype: DType, bytes: Vec<u8>) -> Result<Self, TensorError> {
        let expected = numel(&shape) * dtype.size();
        if bytes.len() != expected {
            return Err(TensorError::ByteLength {
                shape,
                dtype,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { shape, dtype, bytes })
    }

    /// Build a tensor from typed values.
    pub fn from_slice<E: Element>(values: &[E], shape: Vec<usize>) -> Result<Self, TensorError> {
        let mut bytes = Vec::with_capacity(values.len() * E::DTYPE.size());
        for &v in values {
            v.write_le(&mut bytes);
        }
        Self::new(shape, E::DTYPE, bytes)
    }

    /// Build a boolean tensor (one byte per flag).
    pub fn from_bools(values: &[bool], shape: Vec<usize>) -> Result<Self, TensorError> {
        let bytes = values.iter().map(|&b| b as u8).collect();
        Self::new(shape, DType::Bool, bytes)
    }

    /// Rank-0 `f32` tensor.
    pub fn scalar_f32(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            dtype: DType::F32,
            bytes: value.to_le_bytes().to_vec(),
        }
    }

    /// Zero-filled tensor.
    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let len = numel(&shape) * dtype.size();
        Self {
            shape,
            dtype,
            bytes: vec![0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    pub fn signature(&self) -> TensorSignature {
        TensorSignature {
            shape: self.shape.clone(),
            dtype: self.dtype,
        }
    }

    /// Decode the contents as `E`. Fails if `E` is not this tensor's dtype.
    pub fn to_vec<E: Element>(&self) -> Result<Vec<E>, TensorError> {
        if E::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: E::DTYPE,
                actual: self.dtype,
            });
        }
        Ok(self
            .bytes
            .chunks_exact(self.dtype.size())
            .map(E::read_le)
            .collect())
    }

    /// Decode a boolean tensor.
    pub fn to_bools(&self) -> Result<Vec<bool>, TensorError> {
        if self.dtype != DType::Bool {
            return Err(TensorError::DTypeMismatch {
                expected: DType::Bool,
                actual: self.dtype,
            });
        }
        Ok(self.bytes.iter().map(|&b| b != 0).collect())
    }

    /// Reinterpret with a new shape holding the same number of elements.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, TensorError> {
        if numel(&shape) != self.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape,
                actual: shape,
            });
        }
        Ok(Self { shape, ..self })
    }

    /// Stack equally-shaped tensors along a new leading axis.
    ///
    /// `[a, b, c]` each of shape `S` becomes one tensor of shape `[3, S...]`.
    pub fn stack(parts: &[&TensorBlob]) -> Result<Self, TensorError> {
        let first = parts.first().ok_or(TensorError::EmptyStack)?;
        let mut bytes = Vec::with_capacity(first.bytes.len() * parts.len());
        for part in parts {
            if part.dtype != first.dtype {
                return Err(TensorError::DTypeMismatch {
                    expected: first.dtype,
                    actual: part.dtype,
                });
            }
            if part.shape != first.shape {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.clone(),
                    actual: part.shape.clone(),
                });
            }
            bytes.extend_from_slice(&part.bytes);
        }

        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(parts.len());
        shape.extend_from_slice(&first.shape);

        Ok(Self {
            shape,
            dtype: first.dtype,
            bytes,
        })
    }
}

// Payloads can be large; keep Debug output to the signature.
impl fmt::Debug for TensorBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorBlob")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}
