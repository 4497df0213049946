//! Arbitrary-precision π digit computation (the `COMPUTE_PI` kernel).
//! Computes the digits once up front over `num_bigint::BigInt` fixed-point
//! arithmetic, then reports progress in a second digit-by-digit pass so a
//! client polling status sees smooth, steady progress independent of how
//! long the arithmetic itself took.

use num_bigint::BigInt;
use reporter::Reporter;
use serde_json::json;
use std::time::Duration;
use task_types::{CoreError, Progress, TaskState, TaskStatus};

const GUARD_DIGITS: u32 = 15;

#[derive(Debug, Clone)]
pub struct ComputePiSettings {
    pub sleep_per_digit_ms: u64,
    pub rounding_policy: RoundingPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingPolicy {
    Truncate,
    Round,
}

impl ComputePiSettings {
    /// A per-kernel tuning knob distinct from `config::WorkerPoolSettings`,
    /// which only sizes the worker process's concurrency.
    pub fn from_env() -> Self {
        let sleep_per_digit_ms = std::env::var("SLEEP_PER_DIGIT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        let rounding_policy = match std::env::var("ROUNDING_POLICY").as_deref() {
            Ok("ROUND") => RoundingPolicy::Round,
            _ => RoundingPolicy::Truncate,
        };
        Self { sleep_per_digit_ms, rounding_policy }
    }
}

/// Computes π to `digits` decimal places via Machin's formula
/// (`π = 16·atan(1/5) − 4·atan(1/239)`) in fixed-point integer arithmetic,
/// then reports progress once per digit and the final result.
pub async fn run(
    digits: u32,
    reporter: &Reporter,
    settings: &ComputePiSettings,
) -> Result<(), CoreError> {
    if digits == 0 {
        return Err(CoreError::Fatal("compute_pi requires digits > 0".to_string()));
    }

    reporter
        .report_status(TaskStatus {
            state: TaskState::Running,
            progress: Progress { current: Some(0), total: Some(digits as i64), ..Default::default() },
            message: Some("computing".to_string()),
            metrics: Default::default(),
        })
        .await?;

    let pi_digits = compute_pi_digits(digits, settings.rounding_policy);

    for k in 0..digits {
        if settings.sleep_per_digit_ms > 0 {
            tokio::time::sleep(Duration::from_millis(settings.sleep_per_digit_ms)).await;
        }
        let percentage = (k + 1) as f64 / digits as f64;
        reporter
            .report_status(TaskStatus {
                state: TaskState::Running,
                progress: Progress {
                    current: Some((k + 1) as i64),
                    total: Some(digits as i64),
                    percentage: Some(percentage),
                    phase: None,
                },
                message: None,
                metrics: Default::default(),
            })
            .await?;
    }

    reporter
        .report_status(TaskStatus {
            state: TaskState::Completed,
            progress: Progress {
                current: Some(digits as i64),
                total: Some(digits as i64),
                percentage: Some(1.0),
                phase: None,
            },
            message: None,
            metrics: Default::default(),
        })
        .await?;
    reporter.report_result(json!({"digits": digits, "pi": pi_digits})).await?;
    Ok(())
}

fn pow10(n: u32) -> BigInt {
    BigInt::parse_bytes(format!("1{}", "0".repeat(n as usize)).as_bytes(), 10)
        .expect("decimal digit string always parses")
}

fn compute_pi_digits(digits: u32, rounding: RoundingPolicy) -> String {
    let scale_digits = digits + GUARD_DIGITS;
    let scale = pow10(scale_digits);

    let atan5 = arctan_reciprocal(5, &scale);
    let atan239 = arctan_reciprocal(239, &scale);
    let pi_scaled = atan5 * 16 - atan239 * 4;

    let guard_factor = pow10(GUARD_DIGITS);
    let reduced = match rounding {
        RoundingPolicy::Truncate => pi_scaled / &guard_factor,
        RoundingPolicy::Round => (pi_scaled + (&guard_factor / 2)) / &guard_factor,
    };

    let s = reduced.to_string();
    let (int_part, frac_part) = s.split_at(1);
    format!("{int_part}.{frac_part}")
}

/// Fixed-point `atan(1/x)` via its Taylor series, scaled by `scale`.
fn arctan_reciprocal(x: u32, scale: &BigInt) -> BigInt {
    let x_big = BigInt::from(x);
    let x2 = &x_big * &x_big;
    let mut term = scale / &x_big;
    let mut sum = BigInt::from(0);
    let mut denom: u64 = 1;
    let mut positive = true;

    while term != BigInt::from(0) {
        let contribution = &term / BigInt::from(denom);
        if positive {
            sum += &contribution;
        } else {
            sum -= &contribution;
        }
        term = &term / &x2;
        denom += 2;
        positive = !positive;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_pi_prefix() {
        let pi = compute_pi_digits(20, RoundingPolicy::Truncate);
        assert!(pi.starts_with("3.14159265358979323"));
    }

    #[test]
    fn rounding_policy_can_round_up_the_last_digit() {
        let truncated = compute_pi_digits(10, RoundingPolicy::Truncate);
        let rounded = compute_pi_digits(10, RoundingPolicy::Round);
        assert_eq!(truncated.len(), rounded.len());
    }
}
