use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Simulation time in seconds. Fixed-point so timer sweeps are deterministic.
pub type Seconds = Fixed64;

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display, never in sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Convert a duration in seconds read from data or input into sim time.
/// Non-finite values become zero; out-of-range values saturate.
#[inline]
pub fn f64_to_seconds(v: f64) -> Seconds {
    if v.is_finite() {
        Seconds::saturating_from_num(v)
    } else {
        Seconds::ZERO
    }
}

/// Convert sim time to floating-point seconds for display and queries.
#[inline]
pub fn seconds_to_f64(v: Seconds) -> f64 {
    fixed64_to_f64(v)
}
