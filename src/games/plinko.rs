//! Plinko: one left/right bounce per row, bucket = number of right bounces.

use crate::errors::ValidationError;
use crate::fairness::{bounded_ints, Draw, SeedPair};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlinkoRisk {
    Low,
    Medium,
    High,
}

impl std::str::FromStr for PlinkoRisk {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(PlinkoRisk::Low),
            "medium" => Ok(PlinkoRisk::Medium),
            "high" => Ok(PlinkoRisk::High),
            other => Err(ValidationError::InvalidParameters(format!("unknown plinko risk '{}'", other))),
        }
    }
}

pub const SUPPORTED_ROWS: [usize; 3] = [8, 12, 16];

// Edge-to-centre halves of each symmetric payout table.
static ROWS_8: [[f64; 5]; 3] = [
    [5.6, 2.1, 1.1, 1.0, 0.5],
    [13.0, 3.0, 1.3, 0.7, 0.4],
    [29.0, 4.0, 1.5, 0.3, 0.2],
];
static ROWS_12: [[f64; 7]; 3] = [
    [10.0, 3.0, 1.6, 1.4, 1.1, 1.0, 0.5],
    [33.0, 11.0, 4.0, 2.0, 1.1, 0.6, 0.3],
    [170.0, 24.0, 8.1, 2.0, 0.7, 0.2, 0.2],
];
static ROWS_16: [[f64; 9]; 3] = [
    [16.0, 9.0, 2.0, 1.4, 1.4, 1.2, 1.1, 1.0, 0.5],
    [110.0, 41.0, 10.0, 5.0, 3.0, 1.5, 1.0, 0.5, 0.3],
    [1000.0, 130.0, 26.0, 9.0, 4.0, 2.0, 0.2, 0.2, 0.2],
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlinkoParams {
    pub rows: usize,
    pub risk: PlinkoRisk,
}

impl PlinkoParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !SUPPORTED_ROWS.contains(&self.rows) {
            return Err(ValidationError::InvalidParameters(format!(
                "plinko rows must be one of {:?}, got {}",
                SUPPORTED_ROWS, self.rows
            )));
        }
        Ok(())
    }

    fn half_table(&self) -> &'static [f64] {
        let risk = match self.risk {
            PlinkoRisk::Low => 0,
            PlinkoRisk::Medium => 1,
            PlinkoRisk::High => 2,
        };
        match self.rows {
            8 => &ROWS_8[risk],
            12 => &ROWS_12[risk],
            _ => &ROWS_16[risk],
        }
    }

    /// Payout multiplier for a bucket in `0..=rows`.
    pub fn multiplier(&self, bucket: usize) -> Option<f64> {
        if bucket > self.rows {
            return None;
        }
        let from_edge = bucket.min(self.rows - bucket);
        self.half_table().get(from_edge).copied()
    }

    /// The full table, left edge to right edge.
    pub fn table(&self) -> Vec<f64> {
        (0..=self.rows).filter_map(|bucket| self.multiplier(bucket)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlinkoDrop {
    /// `true` = bounced right
    pub path: Vec<bool>,
    pub bucket: usize,
    pub multiplier: f64,
}

/// Row `i` bounces right when hex char `i` is odd.
pub fn evaluate(seed: &SeedPair, params: &PlinkoParams) -> Result<PlinkoDrop, ValidationError> {
    params.validate()?;

    let path: Vec<bool> = bounded_ints(seed, None, Draw::sequence(params.rows, 2, 1))?
        .into_iter()
        .map(|bit| bit == 1)
        .collect();
    let bucket = path.iter().filter(|right| **right).count();
    let multiplier = params.multiplier(bucket).ok_or_else(|| {
        ValidationError::InvalidParameters(format!("no payout for bucket {}", bucket))
    })?;

    Ok(PlinkoDrop {
        path,
        bucket,
        multiplier,
    })
}
