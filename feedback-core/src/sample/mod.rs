//! Raw feedback readings and electrode actuation state.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelRangeError, DerivationError, SampleError};

/// One measurement cycle as returned by the board: interleaved
/// `(V_fb, Z_fb)` pairs, feedback voltage at even indices and feedback
/// impedance magnitude at odd indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImpedanceSample {
    readings: Vec<f64>,
}

impl ImpedanceSample {
    /// Wraps an interleaved buffer, rejecting a dangling half pair.
    pub fn from_interleaved(readings: Vec<f64>) -> Result<Self, SampleError> {
        if readings.len() % 2 != 0 {
            return Err(SampleError::OddLength(readings.len()));
        }
        Ok(Self { readings })
    }

    /// Builds a sample from separate `(V_fb, Z_fb)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut readings = Vec::new();
        for (v_fb, z_fb) in pairs {
            readings.push(v_fb);
            readings.push(z_fb);
        }
        Self { readings }
    }

    /// Number of `(V_fb, Z_fb)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.readings.len() / 2
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Feedback voltages, one per pair.
    pub fn feedback_voltages(&self) -> impl Iterator<Item = f64> + '_ {
        self.readings.iter().step_by(2).copied()
    }

    /// Feedback impedance magnitudes, one per pair.
    pub fn feedback_impedances(&self) -> impl Iterator<Item = f64> + '_ {
        self.readings.iter().skip(1).step_by(2).copied()
    }

    /// Splits the sample into `V_fb` and `Z_fb` columns.
    #[must_use]
    pub fn split(&self) -> (Vec<f64>, Vec<f64>) {
        (
            self.feedback_voltages().collect(),
            self.feedback_impedances().collect(),
        )
    }

    /// Device impedance per pair for an applied voltage `v_total`:
    /// `Z_device = Z_fb * (V_total / V_fb - 1)`.
    pub fn device_impedance(&self, v_total: f64) -> Result<Vec<f64>, DerivationError> {
        let (v_fb, z_fb) = self.split();
        device_impedance(&v_fb, &z_fb, v_total)
    }
}

/// Applies the feedback divider model to matching `V_fb` / `Z_fb` columns.
pub fn device_impedance(
    v_fb: &[f64],
    z_fb: &[f64],
    v_total: f64,
) -> Result<Vec<f64>, DerivationError> {
    v_fb.iter()
        .zip(z_fb)
        .enumerate()
        .map(|(index, (&v, &z))| {
            if v == 0.0 {
                Err(DerivationError::ZeroFeedbackVoltage { index })
            } else {
                Ok(z * (v_total / v - 1.0))
            }
        })
        .collect()
}

/// Smallest value in `values`.
pub fn minimum(values: &[f64]) -> Result<f64, DerivationError> {
    values
        .iter()
        .copied()
        .reduce(f64::min)
        .ok_or(DerivationError::EmptySample)
}

/// Per-channel actuation state handed to the board (`true` = actuated).
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    channels: Vec<bool>,
}

impl ChannelState {
    /// All channels off.
    #[must_use]
    pub fn all_off(count: usize) -> Self {
        Self {
            channels: alloc::vec![false; count],
        }
    }

    /// `count` channels with only `actuated` switched on.
    pub fn from_actuated(count: usize, actuated: &[usize]) -> Result<Self, ChannelRangeError> {
        let mut state = Self::all_off(count);
        for &index in actuated {
            let slot = state.channels.get_mut(index).ok_or(ChannelRangeError {
                channel: index,
                available: count,
            })?;
            *slot = true;
        }
        Ok(state)
    }

    /// Number of channels described.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn is_actuated(&self, index: usize) -> bool {
        self.channels.get(index).copied().unwrap_or(false)
    }

    /// Indices of actuated channels in ascending order.
    pub fn actuated(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(index, &on)| on.then_some(index))
    }

    /// Number of channels the board must expose for this state to apply:
    /// one past the highest actuated index.
    #[must_use]
    pub fn required_channels(&self) -> usize {
        self.actuated().last().map_or(0, |highest| highest + 1)
    }

    /// Channel state as `{0, 1}` per channel.
    #[must_use]
    pub fn to_bits(&self) -> Vec<u8> {
        self.channels.iter().map(|&on| u8::from(on)).collect()
    }
}
