//! Polar obstacle-density histogram over one oscillation.

use tracing::warn;
use types::{LidarOscillation, PolarObstacleDensity, SectorObstacleDensity};

/// Histogram parameters.
///
/// Out-of-range values fall back to the documented defaults rather than
/// failing construction; a drone in the field flies with a sane histogram
/// over a mistyped config entry.
#[derive(Debug, Clone, Copy)]
pub struct HistogramConfig {
    /// Angular size of each sector, degrees.
    pub sector_width: f64,
    /// Histogram extent, degrees.
    pub start_angle: f64,
    pub end_angle: f64,
    /// Magnitude assigned to an obstacle at zero distance, in [0, 1].
    pub max_vector_magnitude: f64,
    /// Magnitude lost per metre of distance, in [0, 1].
    pub linear_decay_rate: f64,
    /// Per-detection certainty, in [0, 1]; applied squared.
    pub confidence_value: f64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            sector_width: 2.0,
            start_angle: -90.0,
            end_angle: 90.0,
            max_vector_magnitude: 1.0,
            linear_decay_rate: 0.1,
            confidence_value: 0.9,
        }
    }
}

/// Converts oscillations into [`PolarObstacleDensity`] histograms.
#[derive(Debug)]
pub struct VectorFieldHistogram {
    config: HistogramConfig,
    num_sectors: usize,
}

impl VectorFieldHistogram {
    /// Build a histogram generator, sanitising invalid parameters.
    pub fn new(mut config: HistogramConfig) -> Self {
        let defaults = HistogramConfig::default();

        if config.sector_width <= 0.0 {
            warn!(value = config.sector_width, "invalid sector_width, using default");
            config.sector_width = defaults.sector_width;
        }
        if !(0.0..=1.0).contains(&config.max_vector_magnitude) {
            warn!(
                value = config.max_vector_magnitude,
                "invalid max_vector_magnitude, using default"
            );
            config.max_vector_magnitude = defaults.max_vector_magnitude;
        }
        if !(0.0..=1.0).contains(&config.linear_decay_rate) {
            warn!(
                value = config.linear_decay_rate,
                "invalid linear_decay_rate, using default"
            );
            config.linear_decay_rate = defaults.linear_decay_rate;
        }
        if !(0.0..=1.0).contains(&config.confidence_value) {
            warn!(
                value = config.confidence_value,
                "invalid confidence_value, using default"
            );
            config.confidence_value = defaults.confidence_value;
        }
        if config.start_angle >= config.end_angle {
            warn!(
                start = config.start_angle,
                end = config.end_angle,
                "invalid histogram extent, using default"
            );
            config.start_angle = defaults.start_angle;
            config.end_angle = defaults.end_angle;
        }

        let mut num_sectors =
            ((config.end_angle - config.start_angle) / config.sector_width) as usize;
        if num_sectors == 0 {
            // Extent narrower than one sector; treat the whole pairing as
            // invalid.
            warn!(
                start = config.start_angle,
                end = config.end_angle,
                width = config.sector_width,
                "histogram extent narrower than one sector, using defaults"
            );
            config.sector_width = defaults.sector_width;
            config.start_angle = defaults.start_angle;
            config.end_angle = defaults.end_angle;
            num_sectors =
                ((config.end_angle - config.start_angle) / config.sector_width) as usize;
        }

        Self {
            config,
            num_sectors,
        }
    }

    pub fn num_sectors(&self) -> usize {
        self.num_sectors
    }

    /// Accumulate one oscillation into a polar density histogram.
    pub fn run(&self, oscillation: &LidarOscillation) -> PolarObstacleDensity {
        let cfg = &self.config;
        let mut densities = vec![0.0_f64; self.num_sectors];

        for reading in &oscillation.readings {
            if reading.angle < cfg.start_angle || reading.angle > cfg.end_angle {
                continue;
            }

            let index = ((reading.angle - cfg.start_angle) / cfg.sector_width) as usize;
            let index = index.min(self.num_sectors - 1);

            let distance_factor =
                cfg.max_vector_magnitude - cfg.linear_decay_rate * reading.distance;
            let magnitude = cfg.confidence_value * cfg.confidence_value * distance_factor;
            densities[index] += magnitude.max(0.0);
        }

        let sectors = densities
            .iter()
            .enumerate()
            .map(|(i, &density)| {
                let angle_start = cfg.start_angle + i as f64 * cfg.sector_width;
                SectorObstacleDensity {
                    angle_start,
                    angle_end: angle_start + cfg.sector_width,
                    density,
                }
            })
            .collect();

        PolarObstacleDensity { sectors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use types::LidarDetection;

    fn oscillation(readings: &[(f64, f64)]) -> LidarOscillation {
        LidarOscillation::new(
            readings
                .iter()
                .map(|&(d, a)| LidarDetection::new(d, a).unwrap())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_sector_count_from_extent() {
        let vfh = VectorFieldHistogram::new(HistogramConfig::default());
        assert_eq!(vfh.num_sectors(), 90);

        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: 5.0,
            ..HistogramConfig::default()
        });
        assert_eq!(vfh.num_sectors(), 36);
    }

    #[test]
    fn test_invalid_parameters_fall_back_to_defaults() {
        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: -1.0,
            start_angle: 45.0,
            end_angle: -45.0,
            max_vector_magnitude: 2.0,
            linear_decay_rate: -0.5,
            confidence_value: 1.5,
        });
        let defaults = HistogramConfig::default();
        assert_relative_eq!(vfh.config.sector_width, defaults.sector_width);
        assert_relative_eq!(vfh.config.start_angle, defaults.start_angle);
        assert_relative_eq!(vfh.config.end_angle, defaults.end_angle);
        assert_relative_eq!(vfh.config.max_vector_magnitude, defaults.max_vector_magnitude);
        assert_relative_eq!(vfh.config.linear_decay_rate, defaults.linear_decay_rate);
        assert_relative_eq!(vfh.config.confidence_value, defaults.confidence_value);
        assert_eq!(vfh.num_sectors(), 90);
    }

    #[test]
    fn test_extent_narrower_than_one_sector_falls_back() {
        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: 50.0,
            start_angle: -10.0,
            end_angle: 10.0,
            ..HistogramConfig::default()
        });
        assert_eq!(vfh.num_sectors(), 90);
    }

    #[test]
    fn test_sectors_partition_extent_contiguously() {
        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: 5.0,
            ..HistogramConfig::default()
        });
        let density = vfh.run(&oscillation(&[(2.0, 0.0)]));

        assert_eq!(density.sectors.len(), 36);
        assert_relative_eq!(density.sectors[0].angle_start, -90.0);
        assert_relative_eq!(density.sectors[35].angle_end, 90.0);
        for pair in density.sectors.windows(2) {
            assert_relative_eq!(pair[0].angle_end, pair[1].angle_start);
        }
    }

    #[test]
    fn test_reading_lands_in_its_sector() {
        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: 5.0,
            ..HistogramConfig::default()
        });
        // 0 degrees falls in sector [0, 5): index 18.
        let density = vfh.run(&oscillation(&[(2.0, 0.0)]));

        // confidence^2 * (max - decay * distance) = 0.81 * (1 - 0.2)
        let expected = 0.81 * 0.8;
        assert_relative_eq!(density.sectors[18].density, expected, epsilon = 1e-12);
        assert!(density
            .sectors
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != 18)
            .all(|(_, s)| s.density == 0.0));
    }

    #[test]
    fn test_density_accumulates_within_sector() {
        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: 5.0,
            ..HistogramConfig::default()
        });
        let density = vfh.run(&oscillation(&[(2.0, 1.0), (2.0, 2.0), (2.0, 3.0)]));
        assert_relative_eq!(density.sectors[18].density, 3.0 * 0.81 * 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_far_reading_contributes_nothing() {
        // Beyond 10 m the 0.1/m decay wipes out the full magnitude.
        let vfh = VectorFieldHistogram::new(HistogramConfig::default());
        let density = vfh.run(&oscillation(&[(15.0, 0.0)]));
        assert!(density.sectors.iter().all(|s| s.density == 0.0));
    }

    #[test]
    fn test_readings_outside_extent_are_skipped() {
        let vfh = VectorFieldHistogram::new(HistogramConfig::default());
        let density = vfh.run(&oscillation(&[(1.0, -120.0), (1.0, 120.0)]));
        assert!(density.sectors.iter().all(|s| s.density == 0.0));
    }

    #[test]
    fn test_end_angle_clamps_to_last_sector() {
        let vfh = VectorFieldHistogram::new(HistogramConfig {
            sector_width: 5.0,
            ..HistogramConfig::default()
        });
        let density = vfh.run(&oscillation(&[(2.0, 90.0)]));
        assert!(density.sectors[35].density > 0.0);
    }
}
