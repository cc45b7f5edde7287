//! Discrete "same"-size convolution with edge-value padding.
//!
//! Spectra are padded with their first/last sample rather than zeros so a
//! normalised kernel leaves a flat continuum flat all the way to the edges.

/// Convolve `signal` with an odd-length `kernel`; output has the signal's length.
///
/// `out[i] = Σ_j kernel[j] · signal[clamp(i + j − h)]` with `h = kernel.len() / 2`.
/// Kernels are symmetric in practice, so correlation and convolution coincide.
pub fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || kernel.is_empty() {
        return signal.to_vec();
    }
    let h = kernel.len() / 2;
    let last = n as isize - 1;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(j, k)| {
                    let idx = (i as isize + j as isize - h as isize).clamp(0, last) as usize;
                    k * signal[idx]
                })
                .sum()
        })
        .collect()
}

/// Transpose of [`convolve_same`]: pushes an output gradient back onto the signal.
pub fn convolve_same_transpose(grad_out: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = grad_out.len();
    if n == 0 || kernel.is_empty() {
        return grad_out.to_vec();
    }
    let h = kernel.len() / 2;
    let last = n as isize - 1;
    let mut grad = vec![0.0; n];
    for (i, g) in grad_out.iter().enumerate() {
        if *g == 0.0 {
            continue;
        }
        for (j, k) in kernel.iter().enumerate() {
            let idx = (i as isize + j as isize - h as isize).clamp(0, last) as usize;
            grad[idx] += k * g;
        }
    }
    grad
}

/// Normalised Gaussian kernel with standard deviation `sigma` in grid samples.
pub fn gaussian_kernel(sigma: f64, half_width: usize) -> Vec<f64> {
    let mut k: Vec<f64> = (0..=2 * half_width)
        .map(|i| {
            let x = i as f64 - half_width as f64;
            (-0.5 * (x / sigma).powi(2)).exp()
        })
        .collect();
    let s: f64 = k.iter().sum();
    if s > 0.0 {
        k.iter_mut().for_each(|v| *v /= s);
    }
    k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_signal_stays_flat_at_edges() {
        let signal = vec![1.0; 20];
        let kernel = gaussian_kernel(2.0, 6);
        let out = convolve_same(&signal, &kernel);
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-12));
    }

    #[test]
    fn transpose_satisfies_adjoint_identity() {
        let x: Vec<f64> = (0..15).map(|i| ((i * 7) % 5) as f64 - 1.5).collect();
        let y: Vec<f64> = (0..15).map(|i| ((i * 3) % 4) as f64 * 0.3).collect();
        let kernel = [0.1, 0.2, 0.4, 0.2, 0.1];
        let ax = convolve_same(&x, &kernel);
        let aty = convolve_same_transpose(&y, &kernel);
        let lhs: f64 = ax.iter().zip(&y).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.iter().zip(&aty).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-12);
    }
}
