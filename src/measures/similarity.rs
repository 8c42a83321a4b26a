//! Similarity measures between an estimate and a reference image

use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

fn check_pair(x: &[f64], reference: &[f64]) -> SolverResult<()> {
    if x.len() != reference.len() {
        return Err(SolverError::shape(reference.len(), x.len(), "similarity measure"));
    }
    Ok(())
}

/// Σ (x - ref)²
pub fn sum_of_squared_differences(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    check_pair(x, reference)?;
    Ok(x.iter().zip(reference).map(|(&a, &b)| (a - b) * (a - b)).sum())
}

/// Σ |x - ref|
pub fn sum_of_absolute_differences(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    check_pair(x, reference)?;
    Ok(x.iter().zip(reference).map(|(&a, &b)| (a - b).abs()).sum())
}

pub fn mean_squared_error(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    Ok(sum_of_squared_differences(x, reference)? / x.len().max(1) as f64)
}

pub fn root_mean_square_error(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    Ok(mean_squared_error(x, reference)?.sqrt())
}

pub fn mean_absolute_error(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    Ok(sum_of_absolute_differences(x, reference)? / x.len().max(1) as f64)
}

/// 10 log10(peak² / MSE) with peak = max |ref|; +inf for identical images.
pub fn peak_signal_to_noise_ratio(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    let mse = mean_squared_error(x, reference)?;
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    let peak = reference.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
    Ok(10.0 * (peak * peak / mse).log10())
}

/// Pearson correlation of the two images; 0 when either is constant.
pub fn normalized_cross_correlation(x: &[f64], reference: &[f64]) -> SolverResult<f64> {
    check_pair(x, reference)?;
    if x.is_empty() {
        return Ok(0.0);
    }

    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_r = reference.iter().sum::<f64>() / n;

    let mut cross = 0.0;
    let mut var_x = 0.0;
    let mut var_r = 0.0;
    for (&a, &b) in x.iter().zip(reference) {
        let da = a - mean_x;
        let db = b - mean_r;
        cross += da * db;
        var_x += da * da;
        var_r += db * db;
    }

    let denom = (var_x * var_r).sqrt();
    if denom < 1e-300 {
        return Ok(0.0);
    }
    Ok(cross / denom)
}

/// Selector for similarity measures, recorded under `name()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SimilarityKind {
    #[serde(rename = "SSD")]
    SumOfSquaredDifferences,
    #[serde(rename = "SAD")]
    SumOfAbsoluteDifferences,
    #[serde(rename = "MSE")]
    MeanSquaredError,
    #[serde(rename = "RMSE")]
    RootMeanSquareError,
    #[serde(rename = "MAE")]
    MeanAbsoluteError,
    #[serde(rename = "PSNR")]
    PeakSignalToNoiseRatio,
    #[serde(rename = "NCC")]
    NormalizedCrossCorrelation,
}

impl SimilarityKind {
    pub const ALL: [SimilarityKind; 7] = [
        SimilarityKind::SumOfSquaredDifferences,
        SimilarityKind::SumOfAbsoluteDifferences,
        SimilarityKind::MeanSquaredError,
        SimilarityKind::RootMeanSquareError,
        SimilarityKind::MeanAbsoluteError,
        SimilarityKind::PeakSignalToNoiseRatio,
        SimilarityKind::NormalizedCrossCorrelation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SimilarityKind::SumOfSquaredDifferences => "SSD",
            SimilarityKind::SumOfAbsoluteDifferences => "SAD",
            SimilarityKind::MeanSquaredError => "MSE",
            SimilarityKind::RootMeanSquareError => "RMSE",
            SimilarityKind::MeanAbsoluteError => "MAE",
            SimilarityKind::PeakSignalToNoiseRatio => "PSNR",
            SimilarityKind::NormalizedCrossCorrelation => "NCC",
        }
    }

    pub fn evaluate(&self, x: &[f64], reference: &[f64]) -> SolverResult<f64> {
        match self {
            SimilarityKind::SumOfSquaredDifferences => sum_of_squared_differences(x, reference),
            SimilarityKind::SumOfAbsoluteDifferences => sum_of_absolute_differences(x, reference),
            SimilarityKind::MeanSquaredError => mean_squared_error(x, reference),
            SimilarityKind::RootMeanSquareError => root_mean_square_error(x, reference),
            SimilarityKind::MeanAbsoluteError => mean_absolute_error(x, reference),
            SimilarityKind::PeakSignalToNoiseRatio => peak_signal_to_noise_ratio(x, reference),
            SimilarityKind::NormalizedCrossCorrelation => normalized_cross_correlation(x, reference),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssd_zero_iff_equal() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(sum_of_squared_differences(&a, &a).unwrap(), 0.0);
        let b = [1.0, 2.0, 5.0];
        assert_eq!(sum_of_squared_differences(&a, &b).unwrap(), 4.0);
        assert_eq!(sum_of_absolute_differences(&a, &b).unwrap(), 2.0);
    }

    #[test]
    fn test_means() {
        let a = [0.0, 0.0, 0.0, 0.0];
        let b = [1.0, -1.0, 2.0, 0.0];
        assert!((mean_squared_error(&a, &b).unwrap() - 1.5).abs() < 1e-15);
        assert!((root_mean_square_error(&a, &b).unwrap() - 1.5_f64.sqrt()).abs() < 1e-15);
        assert!((mean_absolute_error(&a, &b).unwrap() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_psnr() {
        let reference = [0.0, 1.0, 0.0, 1.0];
        assert_eq!(peak_signal_to_noise_ratio(&reference, &reference).unwrap(), f64::INFINITY);

        let x = [0.1, 1.0, 0.0, 1.0];
        // MSE = 0.0025, peak = 1 -> 10 log10(400)
        let psnr = peak_signal_to_noise_ratio(&x, &reference).unwrap();
        assert!((psnr - 10.0 * 400.0_f64.log10()).abs() < 1e-10, "got {}", psnr);
    }

    #[test]
    fn test_ncc() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        assert!((normalized_cross_correlation(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((normalized_cross_correlation(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(normalized_cross_correlation(&a, &[5.0; 4]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_and_names() {
        for kind in SimilarityKind::ALL {
            assert!(matches!(kind.evaluate(&[1.0], &[1.0, 2.0]), Err(SolverError::Shape { .. })));
        }
        assert_eq!(SimilarityKind::PeakSignalToNoiseRatio.name(), "PSNR");
        let json = serde_json::to_string(&SimilarityKind::SumOfSquaredDifferences).unwrap();
        assert_eq!(json, "\"SSD\"");
    }
}
