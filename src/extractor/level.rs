/// Collapse byte frequency bins into one normalized level in [0, 1].
///
/// Plain mean over all bins; an empty snapshot is silence.
pub fn level_from_bins(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u64 = bins.iter().map(|&b| u64::from(b)).sum();
    (sum as f64 / bins.len() as f64 / 255.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_bounds() {
        assert_eq!(level_from_bins(&[0; 1024]), 0.0);
        assert_eq!(level_from_bins(&[255; 1024]), 1.0);
        assert_eq!(level_from_bins(&[]), 0.0);
    }

    #[test]
    fn test_level_is_mean() {
        assert_eq!(level_from_bins(&[0, 255, 0, 255]), 0.5);
        let level = level_from_bins(&[10, 20, 30]);
        assert!((level - 20.0 / 255.0).abs() < 1e-6);
    }
}
