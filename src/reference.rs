//! Reference pattern every committed frame is checked against.
//!
//! The built-in pattern is the 4x3 test image the companion writer appends:
//! samples `1..=12` in row-major order. A different pattern can be supplied through
//! the `[reference]` configuration table.

use crate::config::ReferenceConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::image::{Dimensions, Image};

/// Shape of the built-in test image.
pub const BUILTIN_DIMS: Dimensions = Dimensions::new(4, 3);

/// Samples of the built-in test image, row-major.
pub const BUILTIN_SAMPLES: [u32; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

/// Fixed, known-good image content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencePattern {
    dims: Dimensions,
    samples: Vec<u32>,
}

impl ReferencePattern {
    /// The built-in 4x3 test pattern.
    pub fn builtin() -> Self {
        Self {
            dims: BUILTIN_DIMS,
            samples: BUILTIN_SAMPLES.to_vec(),
        }
    }

    /// Pattern from explicit samples. Fails when the sample count does not match.
    pub fn new(dims: Dimensions, samples: Vec<u32>) -> MonitorResult<Self> {
        let count = dims.checked_sample_count().ok_or_else(|| {
            MonitorError::Configuration(format!("reference dimensions {dims} are too large"))
        })?;
        if count == 0 {
            return Err(MonitorError::Configuration(format!(
                "reference dimensions must be non-zero, got {dims}"
            )));
        }
        if samples.len() != count {
            return Err(MonitorError::Configuration(format!(
                "reference pattern {dims} needs {count} samples, got {}",
                samples.len()
            )));
        }
        Ok(Self { dims, samples })
    }

    /// Pattern described by configuration, falling back to the built-in one.
    ///
    /// Without explicit samples the pattern counts up from 1 in row-major order, which
    /// is the built-in pattern when the shape is 4x3.
    pub fn from_config(config: Option<&ReferenceConfig>) -> MonitorResult<Self> {
        let Some(config) = config else {
            return Ok(Self::builtin());
        };
        let dims = Dimensions::new(config.width, config.height);
        let samples = match &config.samples {
            Some(samples) => samples.clone(),
            None => {
                let last = dims
                    .checked_sample_count()
                    .and_then(|count| u32::try_from(count).ok())
                    .ok_or_else(|| {
                        MonitorError::Configuration(format!(
                            "reference {dims} has more samples than a counting pattern can number"
                        ))
                    })?;
                (1..=last).collect()
            }
        };
        Self::new(dims, samples)
    }

    /// Shape of the pattern.
    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    /// Materialize the pattern as an owned image. Pure and idempotent.
    pub fn load(&self) -> Image {
        // Sample count is checked on construction.
        Image::from_samples(self.dims, self.samples.clone())
            .unwrap_or_else(|| Image::zeroed(self.dims))
    }
}

impl Default for ReferencePattern {
    fn default() -> Self {
        Self::builtin()
    }
}
