//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// The return value `r` satisfies `0.0 <= r < rhs.abs()` in most cases. Due
/// to floating point round-off it can result in `r == rhs.abs()` when `lhs`
/// is much smaller than `rhs.abs()` in magnitude and `lhs < 0.0`. Use
/// [`wrap_2pi`] when the strict upper bound matters.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float
{
    let r = lhs % rhs;
    if r < T::zero() { r + rhs.abs() } else { r }
}

/// Wrap an angle in radians into the range [0, 2pi).
pub fn wrap_2pi<T>(angle: T) -> T
where
    T: Float
{
    let tau_t: T = T::from(std::f64::consts::TAU).unwrap_or_else(T::zero);

    let wrapped = rem_euclid(angle, tau_t);

    // Round-off can land exactly on tau
    if wrapped >= tau_t {
        T::zero()
    }
    else {
        wrapped
    }
}

/// Get the signed angular distance between two angles in the range of [0, 2pi].
///
/// This function will return the shortest signed distance between a and b accounting for wrapping
/// between 0 and 2pi.
pub fn get_ang_dist_2pi<T>(a: T, b: T) -> T
where
    T: Float
{
    let tau_t: T = T::from(std::f64::consts::TAU).unwrap_or_else(T::zero);

    let c = rem_euclid(a - b, tau_t);
    let d = rem_euclid(b - a, tau_t);

    if c < d {
        -c
    }
    else {
        d
    }
}
