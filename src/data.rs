//! Typed numeric arrays attached to points, cells and the mesh as a whole.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MeshError, Result};

/// Element type of a [`DataArray`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::Float32 => "float32",
            DType::Int64   => "int64",
            DType::Int32   => "int32",
        }
    }

    pub fn size(self) -> usize {
        match self {
            DType::Float64 | DType::Int64 => 8,
            DType::Float32 | DType::Int32 => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::Int64 | DType::Int32)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw values of an array, row-major over `(tuples, components)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
pub enum ArrayValues {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
}

impl ArrayValues {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayValues::Float64(_) => DType::Float64,
            ArrayValues::Float32(_) => DType::Float32,
            ArrayValues::Int64(_)   => DType::Int64,
            ArrayValues::Int32(_)   => DType::Int32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float64(v) => v.len(),
            ArrayValues::Float32(v) => v.len(),
            ArrayValues::Int64(v)   => v.len(),
            ArrayValues::Int32(v)   => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn empty_like(&self, capacity: usize) -> Self {
        match self {
            ArrayValues::Float64(_) => ArrayValues::Float64(Vec::with_capacity(capacity)),
            ArrayValues::Float32(_) => ArrayValues::Float32(Vec::with_capacity(capacity)),
            ArrayValues::Int64(_)   => ArrayValues::Int64(Vec::with_capacity(capacity)),
            ArrayValues::Int32(_)   => ArrayValues::Int32(Vec::with_capacity(capacity)),
        }
    }

    /// Append `other[start..end]`; both sides must share a dtype.
    fn extend_range(&mut self, other: &ArrayValues, start: usize, end: usize) {
        match (self, other) {
            (ArrayValues::Float64(a), ArrayValues::Float64(b)) => a.extend_from_slice(&b[start..end]),
            (ArrayValues::Float32(a), ArrayValues::Float32(b)) => a.extend_from_slice(&b[start..end]),
            (ArrayValues::Int64(a), ArrayValues::Int64(b))     => a.extend_from_slice(&b[start..end]),
            (ArrayValues::Int32(a), ArrayValues::Int32(b))     => a.extend_from_slice(&b[start..end]),
            _ => unreachable!("dtype checked by caller"),
        }
    }

    /// Value `i` widened to `f64`, for display and tolerance checks.
    pub fn get_f64(&self, i: usize) -> f64 {
        match self {
            ArrayValues::Float64(v) => v[i],
            ArrayValues::Float32(v) => v[i] as f64,
            ArrayValues::Int64(v)   => v[i] as f64,
            ArrayValues::Int32(v)   => v[i] as f64,
        }
    }

    /// Value `i` as an integer; `None` for floating arrays.
    pub fn get_i64(&self, i: usize) -> Option<i64> {
        match self {
            ArrayValues::Int64(v) => Some(v[i]),
            ArrayValues::Int32(v) => Some(v[i] as i64),
            _ => None,
        }
    }
}

// ── DataArray ────────────────────────────────────────────────────────────────

/// A typed array of `len()` tuples with `components()` values each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataArray")]
pub struct DataArray {
    #[serde(rename = "data")]
    values:     ArrayValues,
    components: usize,
}

#[derive(Deserialize)]
struct RawDataArray {
    #[serde(rename = "data")]
    values:     ArrayValues,
    components: usize,
}

impl TryFrom<RawDataArray> for DataArray {
    type Error = MeshError;
    fn try_from(raw: RawDataArray) -> Result<Self> {
        DataArray::new(raw.values, raw.components)
    }
}

impl DataArray {
    pub fn new(values: ArrayValues, components: usize) -> Result<Self> {
        if components == 0 {
            return Err(MeshError::data_shape("array must have at least one component"));
        }
        if values.len() % components != 0 {
            return Err(MeshError::data_shape(format!(
                "{} values do not split into tuples of {components}",
                values.len()
            )));
        }
        Ok(Self { values, components })
    }

    /// Single-component array.
    pub fn scalars(values: ArrayValues) -> Self {
        Self { values, components: 1 }
    }

    pub fn values(&self) -> &ArrayValues { &self.values }

    pub fn into_values(self) -> ArrayValues { self.values }

    pub fn dtype(&self) -> DType { self.values.dtype() }

    pub fn components(&self) -> usize { self.components }

    /// Number of tuples.
    pub fn len(&self) -> usize { self.values.len() / self.components }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Concatenate arrays tuple-wise. All parts must agree on dtype and
    /// component count.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a DataArray>) -> Result<Self> {
        let parts: Vec<&DataArray> = parts.into_iter().collect();
        let first = parts
            .first()
            .ok_or_else(|| MeshError::data_shape("cannot concatenate zero arrays"))?;
        let total = parts.iter().map(|p| p.values.len()).sum();
        let mut values = first.values.empty_like(total);
        for part in &parts {
            if part.dtype() != first.dtype() || part.components != first.components {
                return Err(MeshError::data_shape(format!(
                    "cannot concatenate {}x{} with {}x{}",
                    first.dtype(),
                    first.components,
                    part.dtype(),
                    part.components
                )));
            }
            values.extend_range(&part.values, 0, part.values.len());
        }
        Ok(Self { values, components: first.components })
    }

    /// Tuples `start..end` as a new array.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let c = self.components;
        let mut values = self.values.empty_like((end - start) * c);
        values.extend_range(&self.values, start * c, end * c);
        Self { values, components: c }
    }

    /// Gather tuples in the order given by `indices`.
    pub fn take(&self, indices: &[usize]) -> Self {
        let c = self.components;
        let mut values = self.values.empty_like(indices.len() * c);
        for &i in indices {
            values.extend_range(&self.values, i * c, (i + 1) * c);
        }
        Self { values, components: c }
    }

    /// Equality with a relative/absolute tolerance on floating values.
    /// Integer arrays must match exactly; dtypes may differ in width.
    pub fn approx_eq(&self, other: &DataArray, tolerance: f64) -> bool {
        if self.components != other.components || self.values.len() != other.values.len() {
            return false;
        }
        if self.dtype().is_integer() != other.dtype().is_integer() {
            return false;
        }
        (0..self.values.len()).all(|i| {
            let (a, b) = (self.values.get_f64(i), other.values.get_f64(i));
            (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
        })
    }
}

impl From<Vec<f64>> for DataArray {
    fn from(v: Vec<f64>) -> Self { Self::scalars(ArrayValues::Float64(v)) }
}

impl From<Vec<f32>> for DataArray {
    fn from(v: Vec<f32>) -> Self { Self::scalars(ArrayValues::Float32(v)) }
}

impl From<Vec<i64>> for DataArray {
    fn from(v: Vec<i64>) -> Self { Self::scalars(ArrayValues::Int64(v)) }
}

impl From<Vec<i32>> for DataArray {
    fn from(v: Vec<i32>) -> Self { Self::scalars(ArrayValues::Int32(v)) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_must_divide_values() {
        assert!(DataArray::new(ArrayValues::Float64(vec![1.0; 6]), 3).is_ok());
        assert!(matches!(
            DataArray::new(ArrayValues::Float64(vec![1.0; 5]), 3),
            Err(MeshError::DataShape(_))
        ));
        assert!(DataArray::new(ArrayValues::Int32(vec![]), 0).is_err());
    }

    #[test]
    fn concat_rejects_mixed_layouts() {
        let a = DataArray::from(vec![1.0, 2.0]);
        let b = DataArray::from(vec![3i32]);
        assert!(DataArray::concat([&a, &b]).is_err());

        let v = DataArray::new(ArrayValues::Float64(vec![0.0; 6]), 3).unwrap();
        assert!(DataArray::concat([&a, &v]).is_err());

        let joined = DataArray::concat([&a, &DataArray::from(vec![3.0])]).unwrap();
        assert_eq!(joined.values(), &ArrayValues::Float64(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn take_and_slice_work_on_tuples() {
        let v = DataArray::new(ArrayValues::Int64(vec![0, 1, 10, 11, 20, 21]), 2).unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(v.take(&[2, 0]).values(), &ArrayValues::Int64(vec![20, 21, 0, 1]));
        assert_eq!(v.slice(1, 3).values(), &ArrayValues::Int64(vec![10, 11, 20, 21]));
    }

    #[test]
    fn json_shape_is_validated_on_load() {
        let ok: DataArray =
            serde_json::from_str(r#"{"data":{"dtype":"int32","values":[1,2,3,4]},"components":2}"#).unwrap();
        assert_eq!(ok.len(), 2);
        let bad = serde_json::from_str::<DataArray>(r#"{"data":{"dtype":"int32","values":[1,2,3]},"components":2}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn approx_eq_tolerates_narrowing() {
        let wide = DataArray::from(vec![0.1f64, 1.0 / 3.0]);
        let narrow = DataArray::from(vec![0.1f32, 1.0f32 / 3.0]);
        assert!(!wide.approx_eq(&narrow, 0.0));
        assert!(wide.approx_eq(&narrow, 1e-6));
    }
}
