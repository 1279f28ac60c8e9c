//! FRAM workload regression
//!
//! Each duty block flows through a fixed chain of stages. Every stage appends
//! its own per-duty series to the previous stage's output:
//!
//! Pipeline: DutyBlock → Stage2 → Stage3 → Stage4 → Stage5 → Stage6 → DutyBlockScore

pub mod calculator;
pub mod stage2;
pub mod stage3;
pub mod stage4;
pub mod stage5;
pub mod stage6;

pub use calculator::ScoreCalculator;
pub use stage2::Stage2Calculator;
pub use stage3::Stage3Calculator;
pub use stage4::Stage4Calculator;
pub use stage5::Stage5Calculator;
pub use stage6::Stage6Calculator;

/// Decay applied to a transition contribution by the number of duties since
/// the triggering duty
pub(crate) fn proximity_factor(distance: usize) -> f64 {
    if distance >= 7 {
        return 0.10;
    }
    let n = distance as f64;
    -0.0083 * n * n * n + 0.07 * n * n - 0.2267 * n + 1.1229
}

/// Multiplier for a run of consecutive elongated or high-sector duties
pub(crate) fn run_factor(run: u32) -> f64 {
    let r = run as f64;
    0.1589 * r * r - 0.3182 * r + 1.17
}
