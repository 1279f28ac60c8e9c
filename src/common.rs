//! Shared numeric primitives for the FRAM regression stages
//!
//! Every duration and clock time in the regression model is expressed as a
//! fraction of a day, and every fitted curve is a polynomial clipped from above.

use crate::error::ComputeError;

/// Convert an `"HH:MM[:SS]"` string into a fraction of a day.
///
/// Seconds are ignored. Hours may exceed 23 (e.g. `"24:10"`) and may be
/// negative, in which case the minute component still counts positively.
pub fn time_to_fraction(time: &str) -> Result<f64, ComputeError> {
    let mut parts = time.trim().split(':');
    let hours = parse_component(parts.next(), time)?;
    let minutes = parse_component(parts.next(), time)?;
    Ok((hours as f64 + minutes as f64 / 60.0) / 24.0)
}

/// Cubic polynomial in `t` clipped to `cap`
pub fn capped_cubic(cap: f64, t: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    let value = a * t * t * t + b * t * t + c * t + d;
    cap.min(value)
}

/// Quadratic polynomial in `t` clipped to `cap`
pub fn capped_square(cap: f64, t: f64, a: f64, b: f64, c: f64) -> f64 {
    let value = a * t * t + b * t + c;
    cap.min(value)
}

/// A fitted curve as stored in the regression lookup tables
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    /// `min(cap, a t³ + b t² + c t + d)`
    Cubic { cap: f64, a: f64, b: f64, c: f64, d: f64 },
    /// `min(cap, a t² + b t + c)`
    Square { cap: f64, a: f64, b: f64, c: f64 },
    /// A fixed value independent of `t`
    Constant(f64),
}

impl Curve {
    pub const fn cubic(cap: f64, a: f64, b: f64, c: f64, d: f64) -> Self {
        Curve::Cubic { cap, a, b, c, d }
    }

    pub const fn square(cap: f64, a: f64, b: f64, c: f64) -> Self {
        Curve::Square { cap, a, b, c }
    }

    /// Evaluate the curve at `t`
    pub fn eval(&self, t: f64) -> f64 {
        match *self {
            Curve::Cubic { cap, a, b, c, d } => capped_cubic(cap, t, a, b, c, d),
            Curve::Square { cap, a, b, c } => capped_square(cap, t, a, b, c),
            Curve::Constant(v) => v,
        }
    }
}

/// Fraction of a day for a whole number of hours and minutes
pub(crate) fn hm(hours: u32, minutes: u32) -> f64 {
    (hours as f64 + minutes as f64 / 60.0) / 24.0
}

fn parse_component(part: Option<&str>, source: &str) -> Result<i64, ComputeError> {
    part.map(str::trim)
        .filter(|p| !p.is_empty())
        .and_then(|p| p.parse::<i64>().ok())
        .ok_or_else(|| ComputeError::TimeFormat(source.to_string()))
}
