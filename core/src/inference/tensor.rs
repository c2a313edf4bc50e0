//! Tensor descriptors and decoding of native output buffers.

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use crate::error::{Caffe2Error, Result};

/// Element types the native runtime can hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DType {
    U8,
    I8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    /// Caffe2 `TensorProto.DataType` value.
    pub fn code(&self) -> i32 {
        match self {
            Self::F32 => 1,
            Self::I32 => 2,
            Self::U8 => 6,
            Self::I8 => 7,
            Self::I64 => 10,
            Self::F64 => 13,
        }
    }

    /// Map a Caffe2 `TensorProto.DataType` value back to a dtype.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(Self::F32),
            2 => Ok(Self::I32),
            6 => Ok(Self::U8),
            7 => Ok(Self::I8),
            10 => Ok(Self::I64),
            13 => Ok(Self::F64),
            other => Err(Caffe2Error::UnsupportedDType(format!("code {}", other))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

impl FromStr for DType {
    type Err = Caffe2Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "uint8" | "u8" | "byte" => Ok(Self::U8),
            "int8" | "i8" | "char" => Ok(Self::I8),
            "int32" | "i32" | "int" => Ok(Self::I32),
            "int64" | "i64" | "long" => Ok(Self::I64),
            "float32" | "f32" | "float" => Ok(Self::F32),
            "float64" | "f64" | "double" => Ok(Self::F64),
            other => Err(Caffe2Error::UnsupportedDType(other.to_string())),
        }
    }
}

impl TryFrom<String> for DType {
    type Error = Caffe2Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DType> for String {
    fn from(value: DType) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type and row-major shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    dtype: DType,
    shape: Vec<usize>,
}

impl TensorDescriptor {
    /// Create a descriptor. Every dimension must be positive and the total
    /// byte length must fit in `usize`.
    pub fn new(dtype: DType, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if shape.is_empty() || shape.contains(&0) {
            return Err(Caffe2Error::shape(format!(
                "dimensions must be positive, got {:?}",
                shape
            )));
        }
        shape
            .iter()
            .try_fold(dtype.size_in_bytes(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| {
                Caffe2Error::shape(format!("shape {:?} of {} overflows", shape, dtype))
            })?;
        Ok(Self { dtype, shape })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements described. Cannot overflow; see [`Self::new`].
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of bytes described.
    pub fn byte_len(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }
}

/// A named graph output and how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub name: String,
    pub descriptor: TensorDescriptor,
}

impl OutputNode {
    pub fn new(name: impl Into<String>, descriptor: TensorDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
        }
    }
}

/// Owned tensor decoded from a native buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl Tensor {
    pub fn dtype(&self) -> DType {
        match self {
            Self::U8(_) => DType::U8,
            Self::I8(_) => DType::I8,
            Self::I32(_) => DType::I32,
            Self::I64(_) => DType::I64,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::U8(a) => a.shape(),
            Self::I8(a) => a.shape(),
            Self::I32(a) => a.shape(),
            Self::I64(a) => a.shape(),
            Self::F32(a) => a.shape(),
            Self::F64(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the data if this is a float32 tensor.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Self::F32(a) => Some(a),
            _ => None,
        }
    }
}

/// Rust types that mirror a native element type.
pub trait Element: Copy + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

impl_element!(u8 => U8, i8 => I8, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

/// Bounds-checked view over a buffer owned by the native runtime.
///
/// The length and element width are always supplied by the caller; nothing
/// is inferred from the pointer.
#[derive(Debug, Clone, Copy)]
pub struct ForeignBuffer<'a> {
    ptr: *const u8,
    len: usize,
    width: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> ForeignBuffer<'a> {
    /// Wrap a native pointer holding `len` elements of `width` bytes each.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `len * width` bytes for `'a`, and the
    /// runtime must not mutate or free it during that time.
    pub unsafe fn from_raw(ptr: *const c_void, len: usize, width: usize) -> Result<Self> {
        if ptr.is_null() {
            return Err(Caffe2Error::inference("native output buffer is null"));
        }
        if width == 0 {
            return Err(Caffe2Error::shape("element width must be positive"));
        }
        Ok(Self {
            ptr: ptr.cast(),
            len,
            width,
            _marker: PhantomData,
        })
    }

    /// View a byte slice as `width`-byte elements.
    pub fn from_bytes(bytes: &'a [u8], width: usize) -> Result<Self> {
        if width == 0 || bytes.len() % width != 0 {
            return Err(Caffe2Error::shape(format!(
                "{} bytes is not a whole number of {}-byte elements",
                bytes.len(),
                width
            )));
        }
        Ok(Self {
            ptr: bytes.as_ptr(),
            len: bytes.len() / width,
            width,
            _marker: PhantomData,
        })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Copy the elements out as `T`.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let width = std::mem::size_of::<T>();
        if width != self.width {
            return Err(Caffe2Error::shape(format!(
                "buffer holds {}-byte elements, {} needs {}",
                self.width,
                T::DTYPE,
                width
            )));
        }
        let mut out = Vec::<T>::with_capacity(self.len);
        // SAFETY: `from_raw`/`from_bytes` guarantee `len * width` readable
        // bytes; the destination is freshly allocated for `len` elements and
        // a bytewise copy tolerates an unaligned source.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr, out.as_mut_ptr().cast::<u8>(), self.len * width);
            out.set_len(self.len);
        }
        Ok(out)
    }
}

fn to_array<T: Element>(buffer: &ForeignBuffer<'_>, shape: &[usize]) -> Result<ArrayD<T>> {
    let data = buffer.to_vec::<T>()?;
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| Caffe2Error::shape(format!("Array shape error: {}", e)))
}

/// Copy a native buffer into an owned tensor described by `descriptor`.
pub fn decode(buffer: &ForeignBuffer<'_>, descriptor: &TensorDescriptor) -> Result<Tensor> {
    let dtype = descriptor.dtype();
    if buffer.width() != dtype.size_in_bytes() {
        return Err(Caffe2Error::shape(format!(
            "declared {} but native elements are {} bytes wide",
            dtype,
            buffer.width()
        )));
    }
    if buffer.len() != descriptor.numel() {
        return Err(Caffe2Error::shape(format!(
            "declared shape {:?} holds {} elements, native buffer has {}",
            descriptor.shape(),
            descriptor.numel(),
            buffer.len()
        )));
    }

    let shape = descriptor.shape();
    let tensor = match dtype {
        DType::U8 => Tensor::U8(to_array(buffer, shape)?),
        DType::I8 => Tensor::I8(to_array(buffer, shape)?),
        DType::I32 => Tensor::I32(to_array(buffer, shape)?),
        DType::I64 => Tensor::I64(to_array(buffer, shape)?),
        DType::F32 => Tensor::F32(to_array(buffer, shape)?),
        DType::F64 => Tensor::F64(to_array(buffer, shape)?),
    };
    Ok(tensor)
}
