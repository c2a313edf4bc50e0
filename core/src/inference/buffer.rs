//! Batch marshaling for the native input tensor.

use ndarray::ArrayView4;

use crate::error::{Caffe2Error, Result};

/// Spatial geometry of one input sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub channels: usize,
    pub width: usize,
    pub height: usize,
}

impl InputShape {
    pub fn new(channels: usize, width: usize, height: usize) -> Self {
        Self {
            channels,
            width,
            height,
        }
    }

    /// Elements in one sample.
    pub fn sample_len(&self) -> usize {
        self.channels * self.width * self.height
    }
}

/// A contiguous, zero-padded NCHW batch ready to lend to the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchBuffer {
    data: Vec<f32>,
    batch_size: usize,
    samples: usize,
    input: InputShape,
}

impl BatchBuffer {
    /// Elements in the whole batch, padding included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of caller-supplied samples (the rest is padding).
    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Dimensions as `[batch, channels, height, width]`.
    pub fn dims(&self) -> [usize; 4] {
        [
            self.batch_size,
            self.input.channels,
            self.input.height,
            self.input.width,
        ]
    }

    /// Dimensions in the form the native bridge takes.
    pub fn native_dims(&self) -> [i64; 4] {
        self.dims().map(|d| d as i64)
    }

    /// View the batch as a 4D array.
    pub fn view(&self) -> Result<ArrayView4<'_, f32>> {
        let [b, c, h, w] = self.dims();
        ArrayView4::from_shape((b, c, h, w), &self.data)
            .map_err(|e| Caffe2Error::shape(format!("Array shape error: {}", e)))
    }

    /// Address lent to the native runtime.
    ///
    /// Only valid while `self` is borrowed; the runtime must not retain it
    /// past the call it is passed to.
    pub(crate) fn as_ptr(&self) -> *const f32 {
        self.data.as_ptr()
    }
}

/// Packs flat per-sample buffers into fixed-size batches.
#[derive(Debug, Clone, Copy)]
pub struct BufferMarshaler {
    batch_size: usize,
    input: InputShape,
}

impl BufferMarshaler {
    pub fn new(batch_size: usize, input: InputShape) -> Self {
        Self { batch_size, input }
    }

    /// Concatenate `samples` and zero-pad up to the declared batch size.
    ///
    /// Each entry may hold one or several samples; only the total element
    /// count matters. The total must be a whole number of samples and no more
    /// than `batch_size` of them.
    pub fn prepare<S: AsRef<[f32]>>(&self, samples: &[S]) -> Result<BatchBuffer> {
        let total: usize = samples.iter().map(|s| s.as_ref().len()).sum();
        if total == 0 {
            return Err(Caffe2Error::EmptyInput);
        }

        let shape_len = self.input.sample_len();
        if shape_len == 0 || self.batch_size == 0 {
            return Err(Caffe2Error::shape(format!(
                "batch size and input dimensions must be positive, got batch {} and {:?}",
                self.batch_size, self.input
            )));
        }
        if total % shape_len != 0 {
            return Err(Caffe2Error::shape(format!(
                "{} elements is not a whole number of samples of {} elements",
                total, shape_len
            )));
        }

        let supplied = total / shape_len;
        if supplied > self.batch_size {
            return Err(Caffe2Error::shape(format!(
                "{} samples exceed the batch size of {}",
                supplied, self.batch_size
            )));
        }

        let mut data = Vec::with_capacity(self.batch_size * shape_len);
        for sample in samples {
            data.extend_from_slice(sample.as_ref());
        }
        data.resize(self.batch_size * shape_len, 0.0);

        Ok(BatchBuffer {
            data,
            batch_size: self.batch_size,
            samples: supplied,
            input: self.input,
        })
    }
}

/// Convenience wrapper around [`BufferMarshaler::prepare`].
pub fn prepare<S: AsRef<[f32]>>(
    samples: &[S],
    batch_size: usize,
    channels: usize,
    width: usize,
    height: usize,
) -> Result<BatchBuffer> {
    BufferMarshaler::new(batch_size, InputShape::new(channels, width, height)).prepare(samples)
}
