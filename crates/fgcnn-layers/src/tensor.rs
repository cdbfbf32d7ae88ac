#![allow(clippy::needless_range_loop)]
//! Dense row-major `f32` tensor used by every layer in this crate.
//!
//! Shape errors inside tensor arithmetic are programming errors and panic;
//! layers validate user-facing shapes up front and report [`LayerError`]s.
//!
//! [`LayerError`]: crate::error::LayerError

use serde::{Deserialize, Serialize};

/// A multi-dimensional array stored in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    /// The shape of the tensor (dimensions)
    shape: Vec<usize>,
    /// The underlying data in row-major order
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a new tensor with the given shape, filled with zeros.
    ///
    /// # Example
    ///
    /// ```
    /// use fgcnn_layers::tensor::Tensor;
    ///
    /// let t = Tensor::zeros(&[2, 3]);
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert_eq!(t.numel(), 6);
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; numel],
        }
    }

    /// Creates a new tensor with the given shape, filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Creates a new tensor with the given shape, filled with `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; numel],
        }
    }

    /// Creates a new tensor with the given shape and data.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the shape
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            numel
        );
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Returns a reference to the underlying data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns a mutable reference to the underlying data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consumes the tensor and returns its data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Matrix multiplication between two 2D tensors.
    ///
    /// # Panics
    ///
    /// Panics if the inner dimensions don't match
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(
            self.shape[1], other.shape[0],
            "Inner dimensions must match for matmul"
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a = self.data[i * k + l];
                if a == 0.0 {
                    continue;
                }
                let row = &other.data[l * n..(l + 1) * n];
                let out = &mut result[i * n..(i + 1) * n];
                for j in 0..n {
                    out[j] += a * row[j];
                }
            }
        }

        Tensor::from_data(&[m, n], result)
    }

    /// Transposes a 2D tensor.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires 2D tensor");
        let m = self.shape[0];
        let n = self.shape[1];

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                result[j * m + i] = self.data[i * n + j];
            }
        }

        Tensor::from_data(&[n, m], result)
    }

    /// Element-wise addition with scalar and row broadcasting.
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            self.zip_with(other, |a, b| a + b)
        } else if other.numel() == 1 {
            let scalar = other.data[0];
            self.map(|a| a + scalar)
        } else if self.ndim() == 2 && other.ndim() == 1 && self.shape[1] == other.shape[0] {
            // Broadcast along rows (bias addition)
            let mut data = self.data.clone();
            let n = self.shape[1];
            for i in 0..self.shape[0] {
                for j in 0..n {
                    data[i * n + j] += other.data[j];
                }
            }
            Tensor::from_data(&self.shape, data)
        } else {
            panic!(
                "Cannot broadcast shapes {:?} and {:?}",
                self.shape, other.shape
            );
        }
    }

    /// Element-wise subtraction (same shape or scalar).
    pub fn sub(&self, other: &Tensor) -> Tensor {
        if other.numel() == 1 && self.shape != other.shape {
            let scalar = other.data[0];
            return self.map(|a| a - scalar);
        }
        self.zip_with(other, |a, b| a - b)
    }

    /// Element-wise multiplication (same shape or scalar).
    pub fn mul(&self, other: &Tensor) -> Tensor {
        if other.numel() == 1 && self.shape != other.shape {
            let scalar = other.data[0];
            return self.map(|a| a * scalar);
        }
        self.zip_with(other, |a, b| a * b)
    }

    /// In-place element-wise accumulation of a same-shaped tensor.
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(
            self.shape, other.shape,
            "add_assign requires identical shapes"
        );
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// Scalar multiplication.
    pub fn scale(&self, scalar: f32) -> Tensor {
        self.map(|a| a * scalar)
    }

    /// Element-wise square.
    pub fn sqr(&self) -> Tensor {
        self.map(|a| a * a)
    }

    /// Element-wise absolute value.
    pub fn abs(&self) -> Tensor {
        self.map(f32::abs)
    }

    /// Element-wise sign (`-1`, `0` or `1`).
    pub fn signum(&self) -> Tensor {
        self.map(|a| {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
    }

    /// Sum all elements in the tensor.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Sum along an axis of a 2D tensor.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        assert!(axis < self.ndim(), "Axis out of bounds");
        assert_eq!(self.ndim(), 2, "sum_axis only implemented for 2D tensors");

        let m = self.shape[0];
        let n = self.shape[1];
        if axis == 0 {
            let mut result = vec![0.0; n];
            for i in 0..m {
                for j in 0..n {
                    result[j] += self.data[i * n + j];
                }
            }
            Tensor::from_data(&[n], result)
        } else {
            let result: Vec<f32> = (0..m)
                .map(|i| self.data[i * n..(i + 1) * n].iter().sum())
                .collect();
            Tensor::from_data(&[m], result)
        }
    }

    /// Apply a function element-wise.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        let data: Vec<f32> = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_data(&self.shape, data)
    }

    fn zip_with<F>(&self, other: &Tensor, f: F) -> Tensor
    where
        F: Fn(f32, f32) -> f32,
    {
        assert_eq!(
            self.shape, other.shape,
            "Element-wise op requires identical shapes"
        );
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Reshape the tensor to a new shape.
    ///
    /// # Panics
    ///
    /// Panics if the new shape has a different number of elements
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "Cannot reshape tensor of {} elements to shape {:?}",
            self.numel(),
            new_shape
        );
        Tensor::from_data(new_shape, self.data.clone())
    }

    /// Concatenates tensors along `axis`.
    ///
    /// All tensors must agree on every dimension except `axis`. Tensors with a
    /// zero-sized `axis` are allowed and contribute nothing.
    ///
    /// ```
    /// use fgcnn_layers::tensor::Tensor;
    ///
    /// let a = Tensor::from_data(&[2, 1], vec![1.0, 2.0]);
    /// let b = Tensor::from_data(&[2, 2], vec![3.0, 4.0, 5.0, 6.0]);
    /// let c = Tensor::concat(&[&a, &b], 1);
    /// assert_eq!(c.shape(), &[2, 3]);
    /// assert_eq!(c.data(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    /// ```
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Tensor {
        assert!(!tensors.is_empty(), "concat requires at least one tensor");
        let first = tensors[0].shape();
        assert!(axis < first.len(), "concat axis out of bounds");
        for t in tensors {
            assert_eq!(t.ndim(), first.len(), "concat requires equal ranks");
            for (d, (&a, &b)) in t.shape().iter().zip(first.iter()).enumerate() {
                assert!(
                    d == axis || a == b,
                    "concat shape mismatch: {:?} vs {:?}",
                    t.shape(),
                    first
                );
            }
        }

        let outer: usize = first[..axis].iter().product();
        let chunks: Vec<usize> = tensors
            .iter()
            .map(|t| t.shape()[axis..].iter().product())
            .collect();
        let total_chunk: usize = chunks.iter().sum();

        let mut data = Vec::with_capacity(outer * total_chunk);
        for o in 0..outer {
            for (t, &chunk) in tensors.iter().zip(chunks.iter()) {
                data.extend_from_slice(&t.data[o * chunk..(o + 1) * chunk]);
            }
        }

        let mut shape = first.to_vec();
        shape[axis] = tensors.iter().map(|t| t.shape()[axis]).sum();
        Tensor::from_data(&shape, data)
    }

    /// Splits the tensor along `axis` into pieces of the given sizes.
    ///
    /// Inverse of [`Tensor::concat`].
    pub fn split(&self, axis: usize, sizes: &[usize]) -> Vec<Tensor> {
        assert!(axis < self.ndim(), "split axis out of bounds");
        assert_eq!(
            sizes.iter().sum::<usize>(),
            self.shape[axis],
            "split sizes must add up to the axis length"
        );

        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();
        let row = self.shape[axis] * inner;

        let mut parts = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for &size in sizes {
            let chunk = size * inner;
            let mut data = Vec::with_capacity(outer * chunk);
            for o in 0..outer {
                let start = o * row + offset;
                data.extend_from_slice(&self.data[start..start + chunk]);
            }
            let mut shape = self.shape.clone();
            shape[axis] = size;
            parts.push(Tensor::from_data(&shape, data));
            offset += chunk;
        }
        parts
    }

    /// Stacks equally shaped tensors along a new axis 1.
    ///
    /// `n` tensors of shape `[B, ...]` become one tensor of shape `[B, n, ...]`.
    pub fn stack_dim1(tensors: &[Tensor]) -> Tensor {
        assert!(!tensors.is_empty(), "stack requires at least one tensor");
        let first = tensors[0].shape().to_vec();
        let expanded: Vec<Tensor> = tensors
            .iter()
            .map(|t| {
                assert_eq!(t.shape(), first.as_slice(), "stack requires equal shapes");
                let mut shape = vec![first[0], 1];
                shape.extend_from_slice(&first[1..]);
                t.reshape(&shape)
            })
            .collect();
        let refs: Vec<&Tensor> = expanded.iter().collect();
        Tensor::concat(&refs, 1)
    }
}

impl std::ops::Add for &Tensor {
    type Output = Tensor;

    fn add(self, other: &Tensor) -> Tensor {
        Tensor::add(self, other)
    }
}

impl std::ops::Mul for &Tensor {
    type Output = Tensor;

    fn mul(self, other: &Tensor) -> Tensor {
        Tensor::mul(self, other)
    }
}
