use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Bool,
    UInt8,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DataType {
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::UInt8 | DataType::Int32 | DataType::Int64)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::UInt8 => "uint8",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// Where a tensor's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Place {
    #[default]
    Cpu,
    Gpu(u32),
}

impl Place {
    pub fn device_kind(&self) -> DeviceKind {
        match self {
            Place::Cpu => DeviceKind::Cpu,
            Place::Gpu(_) => DeviceKind::Gpu,
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Cpu => write!(f, "cpu"),
            Place::Gpu(id) => write!(f, "gpu:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl TensorData {
    pub fn data_type(&self) -> DataType {
        match self {
            TensorData::Bool(_) => DataType::Bool,
            TensorData::U8(_) => DataType::UInt8,
            TensorData::I32(_) => DataType::Int32,
            TensorData::I64(_) => DataType::Int64,
            TensorData::F32(_) => DataType::Float32,
            TensorData::F64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::U8(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dense host-side tensor tagged with the place it is considered resident on.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<i64>,
    data: TensorData,
    place: Place,
}

impl Tensor {
    pub fn new(shape: Vec<i64>, data: TensorData) -> Self {
        Tensor {
            shape,
            data,
            place: Place::Cpu,
        }
    }

    pub fn from_i32(values: Vec<i32>) -> Self {
        let shape = vec![values.len() as i64];
        Self::new(shape, TensorData::I32(values))
    }

    pub fn from_i64(values: Vec<i64>) -> Self {
        let shape = vec![values.len() as i64];
        Self::new(shape, TensorData::I64(values))
    }

    pub fn from_u8(values: Vec<u8>) -> Self {
        let shape = vec![values.len() as i64];
        Self::new(shape, TensorData::U8(values))
    }

    pub fn scalar_i32(value: i32) -> Self {
        Self::new(vec![1], TensorData::I32(vec![value]))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::new(vec![1], TensorData::I64(vec![value]))
    }

    pub fn with_place(mut self, place: Place) -> Self {
        self.place = place;
        self
    }

    /// Copies the tensor to `place`. Storage is host memory in every case.
    pub fn to_place(&self, place: Place) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.clone(),
            place,
        }
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Widens integer storage to i64. Returns None for non-integer tensors.
    pub fn as_i64_vec(&self) -> Option<Vec<i64>> {
        match &self.data {
            TensorData::U8(v) => Some(v.iter().map(|x| *x as i64).collect()),
            TensorData::I32(v) => Some(v.iter().map(|x| *x as i64).collect()),
            TensorData::I64(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn as_u8_slice(&self) -> Option<&[u8]> {
        match &self.data {
            TensorData::U8(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_widening() {
        let t = Tensor::from_i32(vec![3, -7]);
        assert_eq!(t.as_i64_vec(), Some(vec![3, -7]));
        assert_eq!(t.data_type(), DataType::Int32);
        assert_eq!(t.shape(), &[2]);

        let f = Tensor::new(vec![1], TensorData::F32(vec![1.0]));
        assert_eq!(f.as_i64_vec(), None);
    }

    #[test]
    fn test_to_place_keeps_values() {
        let t = Tensor::from_i64(vec![1, 2, 3]);
        let g = t.to_place(Place::Gpu(0));
        assert_eq!(g.place().device_kind(), DeviceKind::Gpu);
        assert_eq!(g.data(), t.data());
        assert_eq!(g.to_place(Place::Cpu), t);
    }
}
