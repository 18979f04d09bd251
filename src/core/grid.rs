use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};
use num_traits::Zero;
use std::ops::{Index, IndexMut};

/// Dense gate-major, sample-minor grid reused across dwells.
///
/// Storage is only reallocated when the dwell dimensions change; otherwise
/// `reset` clears the contents in place.
#[derive(Debug, Clone)]
pub struct DwellGrid<T> {
    data: Array2<T>,
}

impl<T: Clone + Zero> DwellGrid<T> {
    pub fn new() -> Self {
        Self {
            data: Array2::zeros((0, 0)),
        }
    }

    pub fn with_dims(n_gates: usize, n_samples: usize) -> Self {
        Self {
            data: Array2::zeros((n_gates, n_samples)),
        }
    }

    /// Resize the grid, returns true if storage was reallocated
    pub fn resize(&mut self, n_gates: usize, n_samples: usize) -> bool {
        if self.data.dim() == (n_gates, n_samples) {
            return false;
        }
        self.data = Array2::zeros((n_gates, n_samples));
        true
    }

    /// Zero every element without reallocating
    pub fn reset(&mut self) {
        self.data.fill(T::zero());
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn n_gates(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn view_mut(&mut self) -> ArrayViewMut2<'_, T> {
        self.data.view_mut()
    }

    pub fn row(&self, gate: usize) -> ArrayView1<'_, T> {
        self.data.row(gate)
    }

    pub fn row_mut(&mut self, gate: usize) -> ArrayViewMut1<'_, T> {
        self.data.row_mut(gate)
    }

    /// Copy one gate into a caller-owned buffer of length `n_samples`
    pub fn copy_row_into(&self, gate: usize, out: &mut [T]) {
        assert_eq!(out.len(), self.n_samples(), "row buffer length");
        for (dst, src) in out.iter_mut().zip(self.data.row(gate).iter()) {
            *dst = src.clone();
        }
    }

    /// Overwrite one gate from a buffer of length `n_samples`
    pub fn set_row(&mut self, gate: usize, values: &[T]) {
        assert_eq!(values.len(), self.n_samples(), "row buffer length");
        for (dst, src) in self.data.row_mut(gate).iter_mut().zip(values.iter()) {
            *dst = src.clone();
        }
    }

    pub fn as_array(&self) -> &Array2<T> {
        &self.data
    }
}

impl<T: Clone + Zero> Default for DwellGrid<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<[usize; 2]> for DwellGrid<T> {
    type Output = T;

    fn index(&self, index: [usize; 2]) -> &T {
        &self.data[index]
    }
}

impl<T> IndexMut<[usize; 2]> for DwellGrid<T> {
    fn index_mut(&mut self, index: [usize; 2]) -> &mut T {
        &mut self.data[index]
    }
}

/// Resize a per-gate array, returns true if storage was reallocated
pub fn resize_gate_array(array: &mut Array1<f64>, n_gates: usize) -> bool {
    if array.len() == n_gates {
        return false;
    }
    *array = Array1::zeros(n_gates);
    true
}
