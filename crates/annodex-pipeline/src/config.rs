//! Pipeline run configuration.

use annodex_core::{defaults, WeightProfile};

/// Configuration for one pipeline run: the batch size of every
/// stage-transition transaction and the weight profile, immutable for the
/// duration of the run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rows consumed per stage-transition transaction.
    pub batch_size: i64,
    /// Scoring constants for the run.
    pub weights: WeightProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::PIPELINE_BATCH_SIZE,
            weights: WeightProfile::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ANNODEX_BATCH_SIZE` | `5000` | Rows per stage-transition transaction |
    /// | `ANNODEX_REPORTED_WEIGHT` | `8.0` | Reported-hit weight |
    /// | `ANNODEX_PREFERRED_TERM_WEIGHT` | `10.0` | Preferred-term hit weight |
    /// | `ANNODEX_SYNONYM_WEIGHT` | `7.0` | Synonym hit weight |
    /// | `ANNODEX_MAPPING_WEIGHT` | `7.0` | Mapping expansion weight |
    /// | `ANNODEX_ISA_DECAY_FACTOR` | `0.2` | Is-a distance decay rate |
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(var: &str, default: T) -> T {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(default)
        }

        let defaults_profile = WeightProfile::default();
        Self {
            batch_size: parse("ANNODEX_BATCH_SIZE", defaults::PIPELINE_BATCH_SIZE).max(1),
            weights: WeightProfile {
                reported_weight: parse(
                    "ANNODEX_REPORTED_WEIGHT",
                    defaults_profile.reported_weight,
                ),
                preferred_term_weight: parse(
                    "ANNODEX_PREFERRED_TERM_WEIGHT",
                    defaults_profile.preferred_term_weight,
                ),
                synonym_weight: parse("ANNODEX_SYNONYM_WEIGHT", defaults_profile.synonym_weight),
                mapping_weight: parse("ANNODEX_MAPPING_WEIGHT", defaults_profile.mapping_weight),
                isa_decay_factor: parse(
                    "ANNODEX_ISA_DECAY_FACTOR",
                    defaults_profile.isa_decay_factor,
                ),
            },
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the weight profile.
    pub fn with_weights(mut self, weights: WeightProfile) -> Self {
        self.weights = weights;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.batch_size, defaults::PIPELINE_BATCH_SIZE);
        assert_eq!(config.weights, WeightProfile::default());
    }

    #[test]
    fn test_config_builder() {
        let weights = WeightProfile {
            reported_weight: 1.0,
            preferred_term_weight: 2.0,
            synonym_weight: 3.0,
            mapping_weight: 4.0,
            isa_decay_factor: 0.5,
        };
        let config = PipelineConfig::default()
            .with_batch_size(100)
            .with_weights(weights);

        assert_eq!(config.batch_size, 100);
        assert_eq!(config.weights, weights);
    }

    #[test]
    fn test_batch_size_floor() {
        let config = PipelineConfig::default().with_batch_size(0);
        assert_eq!(config.batch_size, 1);
    }
}
