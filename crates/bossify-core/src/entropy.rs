//! Entropy admission control.
//!
//! Decides, before any remote work is dispatched, whether a template's
//! variant space is large enough that exhausting it without hitting the
//! target prefix is acceptably unlikely.

use serde::Serialize;

/// Outcome of admission control, with the numbers needed to explain a
/// rejection precisely rather than just refuse.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntropyAssessment {
    pub variant_count: u128,
    pub required_variants: u128,
    /// Bit-width of the target prefix being assessed.
    pub target_bits: u32,
    pub is_valid: bool,
    /// Probability of trying every variant without a hit.
    pub failure_probability: f64,
    /// The configured tolerance (1 / inverse failure rate).
    pub target_failure_probability: f64,
}

impl std::fmt::Display for EntropyAssessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} variants for a {}-bit target ({} required; \
             exhaustion probability {:.3e}, tolerance {:.1e})",
            self.variant_count,
            self.target_bits,
            self.required_variants,
            self.failure_probability,
            self.target_failure_probability
        )
    }
}

/// Bit-width of a hex target prefix: 4 bits per hex digit.
pub fn prefix_bits(prefix: &str) -> u32 {
    4 * prefix.len() as u32
}

/// Probability that one uniformly random `bits`-bit value misses the target.
fn miss_probability(bits: u32) -> f64 {
    1.0 - 0.5f64.powi(bits as i32)
}

/// Minimum variant count `n` such that missing a `bits`-bit target on every
/// one of `n` independent draws has probability at most `1/inverse_rate`:
/// `n >= ln(1/r) / ln((2^b - 1) / 2^b)`, rounded up.
pub fn required_variants(bits: u32, inverse_rate: f64) -> u128 {
    if bits == 0 {
        return 0;
    }
    let n = (1.0 / inverse_rate).ln() / miss_probability(bits).ln();
    n.ceil() as u128
}

/// Assess a variant count against a target bit-width and failure tolerance.
pub fn validate(variant_count: u128, bits: u32, inverse_rate: f64) -> EntropyAssessment {
    let required = required_variants(bits, inverse_rate);
    let failure_probability = if bits == 0 {
        0.0
    } else {
        (variant_count as f64 * miss_probability(bits).ln()).exp()
    };
    EntropyAssessment {
        variant_count,
        required_variants: required,
        target_bits: bits,
        is_valid: variant_count >= required,
        failure_probability,
        target_failure_probability: 1.0 / inverse_rate,
    }
}
