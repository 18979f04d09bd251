use crate::types::IqSample;
use ndarray::Array2;

/// Orthonormal polynomial basis over a fixed number of samples.
///
/// Polynomials are generated with Forsythe's three-term recurrence on the
/// abscissae x in [-1, 1], then normalised. Rows are nested, so the basis for
/// any order up to `max_order` is the leading `order + 1` rows.
#[derive(Debug, Clone)]
pub struct ForsytheBasis {
    n_samples: usize,
    max_order: usize,
    /// (max_order + 1) x n_samples
    polys: Array2<f64>,
}

impl ForsytheBasis {
    pub fn new(n_samples: usize, max_order: usize) -> Self {
        // an order of n-1 would fit the series exactly and leave nothing
        let max_order = max_order.min(n_samples.saturating_sub(2));
        let mut polys = Array2::zeros((max_order + 1, n_samples));

        if n_samples == 0 {
            return Self {
                n_samples,
                max_order,
                polys,
            };
        }

        let xs: Vec<f64> = if n_samples == 1 {
            vec![0.0]
        } else {
            (0..n_samples)
                .map(|i| -1.0 + 2.0 * i as f64 / (n_samples - 1) as f64)
                .collect()
        };

        // unnormalised recurrence: p0 = 1, p1 = (x - a1) p0,
        // p(k+1) = (x - a(k+1)) p(k) - b(k) p(k-1)
        let mut prev = vec![0.0; n_samples];
        let mut curr = vec![1.0; n_samples];
        let mut prev_norm = 1.0;

        for order in 0..=max_order {
            let norm: f64 = curr.iter().map(|p| p * p).sum();
            let scale = if norm > 0.0 { 1.0 / norm.sqrt() } else { 0.0 };
            for (dst, &p) in polys.row_mut(order).iter_mut().zip(curr.iter()) {
                *dst = p * scale;
            }

            if order == max_order || norm <= 0.0 {
                break;
            }

            let alpha = xs
                .iter()
                .zip(curr.iter())
                .map(|(x, p)| x * p * p)
                .sum::<f64>()
                / norm;
            let beta = if order == 0 { 0.0 } else { norm / prev_norm };

            let next: Vec<f64> = (0..n_samples)
                .map(|i| (xs[i] - alpha) * curr[i] - beta * prev[i])
                .collect();
            prev = std::mem::replace(&mut curr, next);
            prev_norm = norm;
        }

        Self {
            n_samples,
            max_order,
            polys,
        }
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    /// Fit a polynomial of `order` to the series and write the residual.
    ///
    /// Returns the order actually used, which is limited by the basis.
    pub fn subtract_fit(&self, iq: &[IqSample], order: usize, residual: &mut [IqSample]) -> usize {
        assert_eq!(iq.len(), self.n_samples, "regression input length");
        assert_eq!(residual.len(), self.n_samples, "regression output length");

        residual.copy_from_slice(iq);
        if self.n_samples < 3 {
            return 0;
        }

        let order = order.min(self.max_order);
        for k in 0..=order {
            let poly = self.polys.row(k);
            let coeff: IqSample = iq
                .iter()
                .zip(poly.iter())
                .map(|(&v, &p)| v * p)
                .sum();
            for (r, &p) in residual.iter_mut().zip(poly.iter()) {
                *r -= coeff * p;
            }
        }
        order
    }
}
