//! Scalar type aliases shared across the crate: a single place to swap the
//! floating-point precision or the qubit-count integer width without
//! touching call sites.

pub use num_complex::Complex;

/// Qubit count / bit position.
pub type N = usize;

/// Real scalar type backing amplitudes.
pub type R = f64;
/// Complex amplitude type.
pub type C = Complex<R>;

/// A bitmask over qubit positions (physical or logical, depending on context).
pub type Mask = usize;

pub const C_ZERO: C = C { re: 0.0, im: 0.0 };
pub const C_ONE: C = C { re: 1.0, im: 0.0 };
pub const C_IMAG: C = C { re: 0.0, im: 1.0 };

/// A dense 2x2 unitary, `m[i][j]` row-major.
pub type M1 = [[C; 2]; 2];

/// Compares two real scalars within an absolute tolerance.
#[inline]
pub fn approx_eq_real(a: R, b: R, tol: R) -> bool {
    (a - b).abs() <= tol
}