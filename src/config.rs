use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sensors::ChannelRange;

/// Startup configuration for the tone engine. Loaded from TOML and handed
/// to the scheduler by value; nothing here lives in a global.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Output sampling rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Clock feeding the PWM counter; the countertop derives from it.
    #[serde(default = "default_pwm_clock_hz")]
    pub pwm_clock_hz: u32,
    /// Entries in the precomputed sine table.
    #[serde(default = "default_table_len")]
    pub table_len: usize,
    /// Integer gain baked into the table after generation.
    #[serde(default = "default_table_gain")]
    pub table_gain: u16,
    /// Samples per output buffer.
    #[serde(default = "default_buffer_len")]
    pub buffer_len: usize,
    /// Ping-pong refill when true; refill-in-place when false.
    #[serde(default = "default_true")]
    pub double_buffer: bool,
    /// Normalized voltage above which a channel counts as touched.
    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: f32,
    /// "ascending" or "inverted" position-to-frequency policy.
    #[serde(default = "default_mapping")]
    pub mapping: String,
    /// Frequency span per touch channel.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelRange>,
    /// Duty value emitted while no tone is playing.
    #[serde(default)]
    pub idle_duty: u16,
    #[serde(default = "default_gain")]
    pub master_gain: f32,
    #[serde(default)]
    pub tremolo_enabled: bool,
    #[serde(default)]
    pub reshape_enabled: bool,
    /// Tremolo LFO rate in Hz.
    #[serde(default = "default_tremolo_freq")]
    pub tremolo_freq: f32,
    /// Tremolo depth in [0, 1].
    #[serde(default = "default_tremolo_depth")]
    pub tremolo_depth: f32,
    /// Aux pad polling rate in Hz (the slow tick).
    #[serde(default = "default_effect_poll_hz")]
    pub effect_poll_hz: f32,
    /// Sensor re-check rate while idle in Hz (the fast tick).
    #[serde(default = "default_idle_poll_hz")]
    pub idle_poll_hz: f32,
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_pwm_clock_hz() -> u32 {
    16_000_000
}

fn default_table_len() -> usize {
    500
}

fn default_table_gain() -> u16 {
    2
}

fn default_buffer_len() -> usize {
    16_000
}

fn default_true() -> bool {
    true
}

fn default_activation_threshold() -> f32 {
    0.17
}

fn default_mapping() -> String {
    "ascending".to_string()
}

fn default_channels() -> Vec<ChannelRange> {
    // E2/A2/D3/G3 strings ramping toward B3/E4/A4/D5
    [(82.0, 246.0), (110.0, 329.0), (146.0, 440.0), (196.0, 587.0)]
        .into_iter()
        .map(|(freq_min, freq_max)| ChannelRange { freq_min, freq_max })
        .collect()
}

fn default_gain() -> f32 {
    1.0
}

fn default_tremolo_freq() -> f32 {
    5.0
}

fn default_tremolo_depth() -> f32 {
    0.5
}

fn default_effect_poll_hz() -> f32 {
    10.0
}

fn default_idle_poll_hz() -> f32 {
    40.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            pwm_clock_hz: default_pwm_clock_hz(),
            table_len: default_table_len(),
            table_gain: default_table_gain(),
            buffer_len: default_buffer_len(),
            double_buffer: true,
            activation_threshold: default_activation_threshold(),
            mapping: default_mapping(),
            channels: default_channels(),
            idle_duty: 0,
            master_gain: default_gain(),
            tremolo_enabled: false,
            reshape_enabled: false,
            tremolo_freq: default_tremolo_freq(),
            tremolo_depth: default_tremolo_depth(),
            effect_poll_hz: default_effect_poll_hz(),
            idle_poll_hz: default_idle_poll_hz(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("wave table needs at least 2 entries, got {0}")]
    TableTooShort(usize),
    #[error("output buffer length must be non-zero")]
    EmptyBuffer,
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
    #[error("pwm countertop is zero for clock {clock} Hz at {sample_rate} Hz")]
    ZeroCounterTop { clock: u32, sample_rate: u32 },
    #[error("at least one touch channel is required")]
    NoChannels,
    #[error(
        "table of {table_len} entries cannot be refilled within a {buffer_len}-sample buffer"
    )]
    RefillDeadline { table_len: usize, buffer_len: usize },
    #[error("channel {channel} range {freq_min}..{freq_max} Hz exceeds the Nyquist limit")]
    FrequencyOutOfRange {
        channel: usize,
        freq_min: f32,
        freq_max: f32,
    },
    #[error("table gain {gain} overflows the duty range at countertop {top}")]
    GainOverflow { gain: u16, top: u16 },
    #[error("idle duty {idle} exceeds countertop {top}")]
    IdleDutyOutOfRange { idle: u16, top: u16 },
    #[error("{field} must lie in [0, 1], got {value}")]
    UnitRange { field: &'static str, value: f32 },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl EngineConfig {
    /// Counter top value for the PWM output at the configured rates.
    pub fn top_value(&self) -> u16 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.pwm_clock_hz / self.sample_rate / 2) as u16
    }

    /// Peak amplitude the raw table is generated with, one count below the
    /// countertop.
    pub fn peak_amplitude(&self) -> u16 {
        self.top_value().saturating_sub(1)
    }

    /// Reject configurations whose refill could not meet the playback
    /// deadline or whose numeric ranges are unusable. Fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.table_len < 2 {
            return Err(ConfigError::TableTooShort(self.table_len));
        }
        if self.buffer_len == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        let top = self.top_value();
        if top == 0 {
            return Err(ConfigError::ZeroCounterTop {
                clock: self.pwm_clock_hz,
                sample_rate: self.sample_rate,
            });
        }
        if self.channels.is_empty() {
            return Err(ConfigError::NoChannels);
        }
        if self.table_len > self.buffer_len {
            return Err(ConfigError::RefillDeadline {
                table_len: self.table_len,
                buffer_len: self.buffer_len,
            });
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        for (channel, range) in self.channels.iter().enumerate() {
            let reachable = range.freq_min.max(0.0) + range.freq_max.max(0.0);
            if range.freq_min < 0.0 || range.freq_max <= 0.0 || reachable >= nyquist {
                return Err(ConfigError::FrequencyOutOfRange {
                    channel,
                    freq_min: range.freq_min,
                    freq_max: range.freq_max,
                });
            }
        }
        if self.table_gain == 0
            || self.peak_amplitude() as u32 * self.table_gain as u32 > u16::MAX as u32
        {
            return Err(ConfigError::GainOverflow {
                gain: self.table_gain,
                top,
            });
        }
        if self.idle_duty > top {
            return Err(ConfigError::IdleDutyOutOfRange {
                idle: self.idle_duty,
                top,
            });
        }
        for (field, value) in [
            ("master_gain", self.master_gain),
            ("tremolo_depth", self.tremolo_depth),
            ("activation_threshold", self.activation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::UnitRange { field, value });
            }
        }
        Ok(())
    }

    /// Load and validate a TOML config file.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML to the provided path
    pub fn write_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> std::io::Result<()> {
        let toml_str = toml::to_string_pretty(self).expect("serialize config");
        std::fs::write(path, toml_str)
    }

    /// Generate a default configuration file at the given path
    pub fn generate_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        Self::default().write_to_file(path)
    }
}
