//! Numeric reductions shared by the synthesizers
//!
//! All functions return `None` when the reduction is undefined for the input
//! (empty, too short, or zero variance where it matters).

use std::cmp::Ordering;

pub fn sum(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum())
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    sum(values).map(|s| s / values.len() as f64)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().min_by(f64::total_cmp)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().max_by(f64::total_cmp)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Population variance (ddof = 0)
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (ddof = 1)
pub fn std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Adjusted Fisher-Pearson skewness; 0 for a constant sample
pub fn skew(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let m = mean(values)?;
    let nf = n as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / nf;
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / nf;
    if m2 <= f64::EPSILON {
        return Some(0.0);
    }
    let g1 = m3 / m2.powf(1.5);
    Some((nf * (nf - 1.0)).sqrt() / (nf - 2.0) * g1)
}

/// Adjusted excess kurtosis; 0 for a constant sample
pub fn kurtosis(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 4 {
        return None;
    }
    let m = mean(values)?;
    let nf = n as f64;
    let s2: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    let s4: f64 = values.iter().map(|v| (v - m).powi(4)).sum();
    if s2 <= f64::EPSILON {
        return Some(0.0);
    }
    let a = (nf + 1.0) * nf * (nf - 1.0) / ((nf - 2.0) * (nf - 3.0));
    let b = 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0));
    Some(a * s4 / (s2 * s2) - b)
}

/// Most frequent value; ties go to the smallest
pub fn mode(values: &[f64]) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j].total_cmp(&sorted[i]) == Ordering::Equal {
            j += 1;
        }
        if best.map_or(true, |(_, count)| j - i > count) {
            best = Some((sorted[i], j - i));
        }
        i = j;
    }
    best.map(|(v, _)| v)
}

pub fn num_unique(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
    sorted.len() as f64
}

/// Share of true values
pub fn percent_true(values: &[bool]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().filter(|v| **v).count() as f64 / values.len() as f64)
    }
}

/// Least-squares slope of `y` over `x`
pub fn trend(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let mx = mean(x)?;
    let my = mean(y)?;
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return None;
    }
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    Some(sxy / sxx)
}

/// Autocorrelation at `lag`, normalized by the population variance
pub fn autocorrelation(values: &[f64], lag: usize) -> Option<f64> {
    let n = values.len();
    if n <= lag {
        return None;
    }
    let m = mean(values)?;
    let var = variance(values)?;
    if var <= f64::EPSILON {
        return None;
    }
    let acc: f64 = values[..n - lag]
        .iter()
        .zip(&values[lag..])
        .map(|(a, b)| (a - m) * (b - m))
        .sum();
    Some(acc / ((n - lag) as f64 * var))
}

/// Non-linearity measure `mean(x[i + 2lag] * x[i + lag] * x[i])`; 0 when too short
pub fn c3(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    if 2 * lag >= n {
        return 0.0;
    }
    let terms = n - 2 * lag;
    let total: f64 = (0..terms)
        .map(|i| values[i + 2 * lag] * values[i + lag] * values[i])
        .sum();
    total / terms as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_central_moments() {
        let v = [1.0, 2.0, 3.0, 4.0, 10.0];
        assert!(close(mean(&v), 4.0));
        assert!(close(median(&v), 3.0));
        assert!(close(variance(&v), 10.0));
        assert!(close(std(&v), 12.5f64.sqrt()));
        assert!(skew(&v).unwrap() > 0.0);
        assert_eq!(skew(&[1.0, 1.0, 1.0]), Some(0.0));
        assert_eq!(kurtosis(&[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_mode_prefers_smallest_on_ties() {
        assert_eq!(mode(&[3.0, 1.0, 3.0, 1.0, 2.0]), Some(1.0));
        assert_eq!(mode(&[]), None);
        assert_eq!(num_unique(&[2.0, 2.0, 5.0]), 2.0);
    }

    #[test]
    fn test_trend() {
        assert!(close(trend(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]), 2.0));
        assert_eq!(trend(&[1.0, 1.0], &[0.0, 5.0]), None);
    }

    #[test]
    fn test_autocorrelation_and_c3() {
        let v = [1.0, 2.0, 1.0, 2.0];
        assert!(close(autocorrelation(&v, 1), -1.0));
        assert_eq!(autocorrelation(&[2.0, 2.0], 1), None);
        assert_eq!(c3(&[1.0, 2.0, 3.0], 1), 6.0);
        assert_eq!(c3(&[1.0, 2.0], 1), 0.0);
    }
}
