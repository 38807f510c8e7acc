/// Solves `A x = b` for a symmetric positive definite `n x n` matrix.
///
/// `a` is row-major and is overwritten with its Cholesky factor `L` (lower
/// triangle), `b` is overwritten with the solution.
///
/// # Returns
/// `false` if `A` isn't positive definite, `b` is then left in an unspecified state.
pub fn cholesky_solve(a: &mut [f64], b: &mut [f64], n: usize) -> bool {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);

    for j in 0..n {
        let diag = a[j * n + j] - (0..j).map(|k| a[j * n + k] * a[j * n + k]).sum::<f64>();
        if diag <= 0. || !diag.is_finite() {
            return false;
        }
        let diag = diag.sqrt();
        a[j * n + j] = diag;

        for i in j + 1..n {
            let dot: f64 = (0..j).map(|k| a[i * n + k] * a[j * n + k]).sum();
            a[i * n + j] = (a[i * n + j] - dot) / diag;
        }
    }

    // L y = b
    for i in 0..n {
        let dot: f64 = (0..i).map(|j| a[i * n + j] * b[j]).sum();
        b[i] = (b[i] - dot) / a[i * n + i];
    }

    // L^T x = y
    for i in (0..n).rev() {
        let dot: f64 = (i + 1..n).map(|j| a[j * n + i] * b[j]).sum();
        b[i] = (b[i] - dot) / a[i * n + i];
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_a_small_system() {
        // [[4, 2], [2, 3]] x = [2, 1] => x = [0.5, 0]
        let mut a = [4., 2., 2., 3.];
        let mut b = [2., 1.];

        assert!(cholesky_solve(&mut a, &mut b, 2));
        assert!((b[0] - 0.5).abs() < 1e-12);
        assert!(b[1].abs() < 1e-12);
    }

    #[test]
    fn rejects_indefinite_matrices() {
        let mut a = [1., 2., 2., 1.];
        let mut b = [1., 1.];

        assert!(!cholesky_solve(&mut a, &mut b, 2));
    }

    #[test]
    fn one_by_one_is_a_division() {
        let mut a = [4.];
        let mut b = [2.];

        assert!(cholesky_solve(&mut a, &mut b, 1));
        assert_eq!(b, [0.5]);
    }
}
