use serde::Deserialize;

use crate::sensors::{SensorReadError, SensorSource};

/// A scripted performance: what the sensors would have seen, step by step.
/// This is the CLI's stand-in for the analog front end; the engine itself
/// only ever sees a `SensorSource`.
#[derive(Deserialize, Debug, Clone)]
pub struct PerformanceData {
    #[serde(default)]
    pub description: String,
    pub steps: Vec<GestureStep>,
}

/// One held gesture: per-channel normalized voltages plus the aux pad
/// states, sustained for `duration` seconds.
#[derive(Deserialize, Debug, Clone)]
pub struct GestureStep {
    pub duration: f64,
    #[serde(default, alias = "voltages")]
    pub levels: Vec<f32>,
    #[serde(default, alias = "aux_touches")]
    pub aux: Vec<bool>,
}

impl PerformanceData {
    pub fn total_duration(&self) -> f64 {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

/// Replays a `PerformanceData` script as a sensor source. Time advances via
/// the scheduler's `advance` clock hint; past the end of the script every
/// channel reads as released.
pub struct ScriptedSensors {
    steps: Vec<GestureStep>,
    sample_rate: f64,
    position: u64,
}

impl ScriptedSensors {
    pub fn new(script: PerformanceData, sample_rate: u32) -> Self {
        Self {
            steps: script.steps,
            sample_rate: sample_rate as f64,
            position: 0,
        }
    }

    pub fn finished(&self) -> bool {
        self.current_step().is_none()
    }

    fn current_step(&self) -> Option<&GestureStep> {
        let mut elapsed = self.position as f64 / self.sample_rate;
        for step in &self.steps {
            if elapsed < step.duration {
                return Some(step);
            }
            elapsed -= step.duration;
        }
        None
    }
}

impl SensorSource for ScriptedSensors {
    fn sample_channel(&mut self, channel: usize) -> Result<f32, SensorReadError> {
        Ok(self
            .current_step()
            .and_then(|step| step.levels.get(channel))
            .copied()
            .unwrap_or(0.0))
    }

    fn aux_pressed(&mut self, index: usize) -> Result<bool, SensorReadError> {
        Ok(self
            .current_step()
            .and_then(|step| step.aux.get(index))
            .copied()
            .unwrap_or(false))
    }

    fn advance(&mut self, frames: usize) {
        self.position += frames as u64;
    }
}
