//! Calibrated capacitance baseline shared by Retry runs.

/// Fraction of the reference capacitance stored as the baseline threshold.
pub const CALIBRATION_SAFETY_FACTOR: f64 = 0.95;

/// Holds the capacitance-per-area baseline that Retry actions fall back to
/// when they carry no explicit threshold.
pub trait CalibrationStore {
    /// Current baseline in F/mm², if one has been calibrated.
    fn baseline(&self) -> Option<f64>;

    /// Replaces the baseline.
    fn set_baseline(&mut self, threshold: f64);

    /// Forgets the baseline.
    fn clear(&mut self);
}

/// Process-local store; the baseline lives as long as the controller.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct InMemoryCalibrationStore {
    baseline: Option<f64>,
}

impl InMemoryCalibrationStore {
    #[must_use]
    pub const fn new() -> Self {
        Self { baseline: None }
    }

    /// Store seeded with an existing baseline.
    #[must_use]
    pub const fn with_baseline(threshold: f64) -> Self {
        Self {
            baseline: Some(threshold),
        }
    }
}

impl CalibrationStore for InMemoryCalibrationStore {
    fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    fn set_baseline(&mut self, threshold: f64) {
        self.baseline = Some(threshold);
    }

    fn clear(&mut self) {
        self.baseline = None;
    }
}

impl<S: CalibrationStore + ?Sized> CalibrationStore for &mut S {
    fn baseline(&self) -> Option<f64> {
        (**self).baseline()
    }

    fn set_baseline(&mut self, threshold: f64) {
        (**self).set_baseline(threshold);
    }

    fn clear(&mut self) {
        (**self).clear();
    }
}

/// Baseline threshold derived from a reference capacitance per area.
#[must_use]
pub fn baseline_from_reference(capacitance_per_area: f64) -> f64 {
    capacitance_per_area * CALIBRATION_SAFETY_FACTOR
}
