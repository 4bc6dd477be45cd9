use crate::error::ConfigError;

/// Procedural scene parameters. Read once per scene setup.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub seed: u64,
    pub radius_min: f32,
    pub radius_max: f32,
    /// Number of placement attempts, not a guaranteed sphere count.
    pub max_spheres: u32,
    pub placement_radius: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            seed: 1223832719,
            radius_min: 5.0,
            radius_max: 30.0,
            max_spheres: 10000,
            placement_radius: 1000.0,
        }
    }
}

impl SceneConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for radius in [self.radius_min, self.radius_max] {
            if !radius.is_finite() || radius < 0.0 {
                return Err(ConfigError::InvalidRadius(radius));
            }
        }

        if self.radius_min > self.radius_max {
            return Err(ConfigError::InvertedRadiusRange {
                min: self.radius_min,
                max: self.radius_max,
            });
        }

        // NaN fails this comparison too
        if !(self.placement_radius > 0.0) || self.placement_radius.is_infinite() {
            return Err(ConfigError::NonPositivePlacementRadius(self.placement_radius));
        }

        Ok(())
    }
}

/// Renderer toggles that can change between frames.
pub struct Settings {
    pub should_accumulate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            should_accumulate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SceneConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_inverted_radius_range() {
        let config = SceneConfig {
            radius_min: 30.0,
            radius_max: 5.0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedRadiusRange { min: 30.0, max: 5.0 })
        );
    }

    #[test]
    fn rejects_non_positive_placement_radius() {
        for placement_radius in [0.0, -10.0, f32::NAN] {
            let config = SceneConfig {
                placement_radius,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::NonPositivePlacementRadius(_))
            ));
        }
    }

    #[test]
    fn degenerate_radius_range_is_allowed() {
        let config = SceneConfig {
            radius_min: 10.0,
            radius_max: 10.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
