//! Tensor payloads (weights, statistics) carried by operators.

use crate::types::DataType;
use crate::{Error, Result};

/// A tensor-shaped payload: element type, shape and raw element bytes.
///
/// Bytes are stored in native byte order. Fusion rewrites recompute the
/// buffer arithmetically through [`Attribute::update_elements`], which
/// rewrites each element in place instead of materializing a second buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Element type.
    pub dtype: DataType,

    /// Dimension sizes.
    pub shape: Vec<usize>,

    data: Vec<u8>,
}

impl Attribute {
    /// Create an attribute from raw bytes.
    ///
    /// Fails if the byte length does not match `shape` and `dtype`.
    pub fn new(dtype: DataType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        let expected = numel * dtype.size();
        if data.len() != expected {
            return Err(Error::Attribute(format!(
                "{} bytes do not match shape {:?} of {} (expected {})",
                data.len(),
                shape,
                dtype,
                expected
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Create an `f32` attribute.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        Self::new(DataType::F32, shape, bytemuck::cast_slice(values).to_vec())
    }

    /// Create an `f64` attribute.
    pub fn from_f64(shape: Vec<usize>, values: &[f64]) -> Result<Self> {
        Self::new(DataType::F64, shape, bytemuck::cast_slice(values).to_vec())
    }

    /// Create a zero-filled attribute.
    pub fn zeros(dtype: DataType, shape: Vec<usize>) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            dtype,
            shape,
            data: vec![0; numel * dtype.size()],
        }
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Raw element bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the attribute and return its bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Copy the elements out as `f32`.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        match self.dtype {
            DataType::F32 => Ok(self
                .data
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()),
            other => Err(Error::Unsupported(format!(
                "reading {other} attribute as f32"
            ))),
        }
    }

    /// Copy the elements out widened to `f64`.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        match self.dtype {
            DataType::F32 => Ok(self
                .data
                .chunks_exact(4)
                .map(|chunk| f64::from(bytemuck::pod_read_unaligned::<f32>(chunk)))
                .collect()),
            DataType::F64 => Ok(self
                .data
                .chunks_exact(8)
                .map(bytemuck::pod_read_unaligned::<f64>)
                .collect()),
            other => Err(Error::Unsupported(format!(
                "reading {other} attribute as f64"
            ))),
        }
    }

    /// Rewrite every element in place.
    ///
    /// `f` receives the flat element index and the current value widened to
    /// `f64`; its result is cast back to the attribute's element type.
    pub fn update_elements(&mut self, mut f: impl FnMut(usize, f64) -> f64) -> Result<()> {
        match self.dtype {
            DataType::F32 => {
                for (i, chunk) in self.data.chunks_exact_mut(4).enumerate() {
                    let value = f64::from(bytemuck::pod_read_unaligned::<f32>(chunk));
                    let updated = f(i, value) as f32;
                    chunk.copy_from_slice(bytemuck::bytes_of(&updated));
                }
                Ok(())
            }
            DataType::F64 => {
                for (i, chunk) in self.data.chunks_exact_mut(8).enumerate() {
                    let value = bytemuck::pod_read_unaligned::<f64>(chunk);
                    let updated = f(i, value);
                    chunk.copy_from_slice(bytemuck::bytes_of(&updated));
                }
                Ok(())
            }
            other => Err(Error::Unsupported(format!(
                "element arithmetic on {other} attribute"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32_round_trip() {
        let attr = Attribute::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(attr.numel(), 4);
        assert_eq!(attr.data().len(), 16);
        assert_eq!(attr.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_new_validates_length() {
        let err = Attribute::new(DataType::F32, vec![3], vec![0; 8]);
        assert!(err.is_err());
    }

    #[test]
    fn test_update_elements_in_place() {
        let mut attr = Attribute::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        attr.update_elements(|i, v| v * if i < 2 { 2.0 } else { 10.0 })
            .unwrap();
        assert_eq!(attr.to_f32_vec().unwrap(), vec![2.0, 4.0, 30.0, 40.0]);
    }

    #[test]
    fn test_update_f64() {
        let mut attr = Attribute::from_f64(vec![2], &[0.5, 1.5]).unwrap();
        attr.update_elements(|_, v| v + 1.0).unwrap();
        assert_eq!(attr.to_f64_vec().unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_integer_arithmetic_unsupported() {
        let mut attr = Attribute::zeros(DataType::I64, vec![4]);
        assert!(attr.update_elements(|_, v| v).is_err());
        assert!(attr.to_f64_vec().is_err());
    }

    #[test]
    fn test_zeros() {
        let attr = Attribute::zeros(DataType::F32, vec![3]);
        assert_eq!(attr.to_f32_vec().unwrap(), vec![0.0; 3]);
    }
}
