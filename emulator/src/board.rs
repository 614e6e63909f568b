//! Simulated control board.
//!
//! Every actuated electrode is modeled as a capacitor in series with one of
//! the board's feedback resistors. Before each reading the board picks the
//! largest resistor that keeps the feedback voltage inside the ADC range,
//! then reports `V_fb = V * R / (R + Z_c)` and `Z_fb = R`. Feeding those
//! readings through the divider model recovers `Z_c = 1 / (2 pi f C)`.

use std::f64::consts::PI;

use feedback_core::controller::FeedbackBoard;
use feedback_core::options::FeedbackOptions;
use feedback_core::sample::{ChannelState, ImpedanceSample};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Feedback resistors available to the auto-ranging front end, in ohms.
pub const SERIES_RESISTORS: [f64; 4] = [1e3, 1e4, 1e5, 1e6];
/// Largest feedback amplitude the ADC can digitize, in volts.
pub const ADC_FULL_SCALE: f64 = 5.0;

#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum BoardError {
    #[error("link lost after {measurements} measurement(s)")]
    LinkLost { measurements: usize },
    #[error("requested {requested} V exceeds the amplifier limit of {limit} V")]
    VoltageOutOfRange { requested: f64, limit: f64 },
}

/// Named electrical scenarios selectable with `--profile`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProfileKind {
    /// Droplet on the electrode; coverage improves with voltage.
    Droplet,
    /// Bare electrode; capacitance stays low at any voltage.
    Dry,
    /// Droplet board whose link drops after a few measurements.
    Flaky,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 3] = [ProfileKind::Droplet, ProfileKind::Dry, ProfileKind::Flaky];

    pub fn tag(self) -> &'static str {
        match self {
            ProfileKind::Droplet => "droplet",
            ProfileKind::Dry => "dry",
            ProfileKind::Flaky => "flaky",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| format!("Unknown board profile `{tag}`"))
    }

    pub fn header(self) -> &'static str {
        match self {
            ProfileKind::Droplet => "DMF Feedback Emulator droplet transcript",
            ProfileKind::Dry => "DMF Feedback Emulator dry-electrode transcript",
            ProfileKind::Flaky => "DMF Feedback Emulator link-loss transcript",
        }
    }

    pub fn profile(self) -> BoardProfile {
        match self {
            ProfileKind::Droplet => BoardProfile::default(),
            ProfileKind::Dry => BoardProfile {
                capacitance_per_mm2: 0.15e-12,
                base_coverage: 1.0,
                ..BoardProfile::default()
            },
            ProfileKind::Flaky => BoardProfile {
                fail_after: Some(3),
                ..BoardProfile::default()
            },
        }
    }
}

/// Electrical parameters of a simulated board.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoardProfile {
    pub channel_count: usize,
    /// Area of a single electrode, in mm².
    pub electrode_area: f64,
    /// Capacitance of a fully covered electrode, in F/mm².
    pub capacitance_per_mm2: f64,
    /// Fraction of the electrode covered at 0 V.
    pub base_coverage: f64,
    /// Voltage at which the droplet covers the whole electrode.
    pub full_coverage_voltage: f64,
    pub max_voltage: f64,
    /// Fail every measurement after this many succeeded.
    pub fail_after: Option<usize>,
}

impl Default for BoardProfile {
    fn default() -> Self {
        Self {
            channel_count: 120,
            electrode_area: 2.5,
            capacitance_per_mm2: 1.5e-12,
            base_coverage: 0.4,
            full_coverage_voltage: 90.0,
            max_voltage: 200.0,
            fail_after: None,
        }
    }
}

impl BoardProfile {
    /// Covered fraction of each actuated electrode at `volts`.
    pub fn coverage(&self, volts: f64) -> f64 {
        if self.full_coverage_voltage <= 0.0 {
            return 1.0;
        }
        let rise = (volts / self.full_coverage_voltage).clamp(0.0, 1.0);
        self.base_coverage + (1.0 - self.base_coverage) * rise
    }

    /// Modeled capacitance of `actuated` electrodes at `volts`.
    pub fn capacitance(&self, actuated: usize, volts: f64) -> f64 {
        let area = self.electrode_area * f64::from(u32::try_from(actuated).unwrap_or(u32::MAX));
        self.capacitance_per_mm2 * area * self.coverage(volts)
    }
}

pub struct SimulatedBoard {
    profile: BoardProfile,
    voltage: f64,
    frequency: f64,
    measurements: usize,
}

impl SimulatedBoard {
    pub fn new(profile: BoardProfile) -> Self {
        Self {
            profile,
            voltage: 0.0,
            frequency: 10e3,
            measurements: 0,
        }
    }

    pub fn profile(&self) -> &BoardProfile {
        &self.profile
    }

    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    pub fn measurements(&self) -> usize {
        self.measurements
    }

    /// One `(V_fb, Z_fb)` reading for a load of `impedance` ohms.
    fn read(&self, impedance: f64) -> (f64, f64) {
        let divide = |resistor: f64| {
            if impedance.is_finite() {
                self.voltage * resistor / (resistor + impedance)
            } else {
                0.0
            }
        };

        let resistor = SERIES_RESISTORS
            .iter()
            .rev()
            .copied()
            .find(|&resistor| divide(resistor) <= ADC_FULL_SCALE)
            .unwrap_or(SERIES_RESISTORS[0]);
        (divide(resistor), resistor)
    }
}

impl FeedbackBoard for SimulatedBoard {
    type Error = BoardError;

    fn channel_count(&self) -> usize {
        self.profile.channel_count
    }

    fn set_frequency(&mut self, hz: f64) -> Result<(), BoardError> {
        trace!(hz, "set frequency");
        self.frequency = hz;
        Ok(())
    }

    fn set_voltage(&mut self, volts: f64) -> Result<(), BoardError> {
        if volts > self.profile.max_voltage {
            warn!(volts, limit = self.profile.max_voltage, "voltage rejected");
            return Err(BoardError::VoltageOutOfRange {
                requested: volts,
                limit: self.profile.max_voltage,
            });
        }
        trace!(volts, "set voltage");
        self.voltage = volts;
        Ok(())
    }

    fn measure_impedance(
        &mut self,
        channels: &ChannelState,
        options: &FeedbackOptions,
    ) -> Result<ImpedanceSample, BoardError> {
        if self
            .profile
            .fail_after
            .is_some_and(|limit| self.measurements >= limit)
        {
            warn!(measurements = self.measurements, "simulated link loss");
            return Err(BoardError::LinkLost {
                measurements: self.measurements,
            });
        }

        let actuated = channels.actuated().count();
        let capacitance = self.profile.capacitance(actuated, self.voltage);
        let impedance = 1.0 / (2.0 * PI * self.frequency * capacitance);
        let reading = self.read(impedance);
        debug!(
            actuated,
            voltage = self.voltage,
            frequency = self.frequency,
            capacitance,
            resistor = reading.1,
            "measured impedance"
        );

        self.measurements += 1;
        Ok(ImpedanceSample::from_pairs(
            (0..options.n_samples).map(|_| reading),
        ))
    }
}
