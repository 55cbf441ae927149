use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Blocking analog/digital front end supplied by the host platform.
///
/// `sample_channel` returns a normalized voltage in `[0, 1]`. `aux_pressed`
/// reads the digital effect-toggle pads. `advance` is a clock hint for
/// scripted or simulated sources that track playback time themselves; real
/// hardware sources ignore it.
pub trait SensorSource {
    fn sample_channel(&mut self, channel: usize) -> Result<f32, SensorReadError>;

    fn aux_pressed(&mut self, _index: usize) -> Result<bool, SensorReadError> {
        Ok(false)
    }

    fn advance(&mut self, _frames: usize) {}
}

#[derive(Debug, Error)]
pub enum SensorReadError {
    #[error("sensor channel {0} unavailable")]
    Unavailable(usize),
}

/// Frequency span of one touch channel, in Hz.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct ChannelRange {
    pub freq_min: f32,
    pub freq_max: f32,
}

/// How a normalized press position maps onto a channel's frequency span.
/// The two deployed sensor layouts ran opposite ramps; both are valid
/// policies rather than one being a bug.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrequencyMapping {
    Ascending,
    Inverted,
}

impl FrequencyMapping {
    pub fn from_name(name: &str) -> Self {
        match name {
            "inverted" => FrequencyMapping::Inverted,
            _ => FrequencyMapping::Ascending,
        }
    }

    fn frequency(self, range: ChannelRange, position: f32) -> f32 {
        match self {
            FrequencyMapping::Ascending => range.freq_min + position * range.freq_max,
            FrequencyMapping::Inverted => range.freq_max - position * range.freq_min,
        }
    }
}

/// Activation state and target pitch for one channel, valid for a single
/// tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelReading {
    pub active: bool,
    pub frequency: f32,
}

/// Turns raw sensor voltages into per-channel activation and frequency.
///
/// A failed read is "reading unavailable this tick": the channel's
/// last-known voltage substitutes so one flaky conversion never aborts a
/// mix pass.
pub struct SensorMapper {
    threshold: f32,
    mapping: FrequencyMapping,
    channels: Vec<ChannelRange>,
    last_known: Vec<f32>,
}

impl SensorMapper {
    pub fn new(threshold: f32, mapping: FrequencyMapping, channels: Vec<ChannelRange>) -> Self {
        let last_known = vec![0.0; channels.len()];
        Self {
            threshold,
            mapping,
            channels,
            last_known,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Split a voltage into (active, normalized position above threshold).
    pub fn classify(&self, voltage: f32) -> (bool, f32) {
        let active = voltage > self.threshold;
        let position = (voltage - self.threshold).max(0.0);
        (active, position)
    }

    /// Sample every channel and rewrite `readings` in place. Inactive
    /// channels report a frequency of zero.
    pub fn read_into(&mut self, source: &mut dyn SensorSource, readings: &mut Vec<ChannelReading>) {
        readings.clear();
        for (ch, &range) in self.channels.iter().enumerate() {
            let voltage = match source.sample_channel(ch) {
                Ok(v) => {
                    self.last_known[ch] = v;
                    v
                }
                Err(err) => {
                    log::warn!("channel {ch}: {err}; holding last value");
                    self.last_known[ch]
                }
            };
            let (active, position) = self.classify(voltage);
            let frequency = if active {
                self.mapping.frequency(range, position)
            } else {
                0.0
            };
            readings.push(ChannelReading { active, frequency });
        }
    }
}
