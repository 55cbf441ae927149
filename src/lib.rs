pub mod audio_io;
pub mod command;
pub mod config;
pub mod dsp;
pub mod effects;
pub mod models;
pub mod scheduler;
pub mod sensors;
pub mod voices;

use command::Command;
use config::{ConfigError, EngineConfig};
use crossbeam::channel::{unbounded, Sender};
use models::{PerformanceData, ScriptedSensors};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use scheduler::StreamScheduler;
use sensors::SensorSource;

/// Control handle for a running stream. Owns the command producer and the
/// stop channel; dropping it leaves the stream running until `stop`.
pub struct EngineHandle {
    commands: HeapProd<Command>,
    stop: Sender<()>,
}

impl EngineHandle {
    pub fn pause(&mut self) {
        let _ = self.commands.try_push(Command::SetPaused(true));
    }

    pub fn resume(&mut self) {
        let _ = self.commands.try_push(Command::SetPaused(false));
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        let _ = self
            .commands
            .try_push(Command::SetMasterGain(gain.clamp(0.0, 1.0)));
    }

    pub fn stop(&self) {
        audio_io::stop_audio_stream(&self.stop);
    }
}

/// Start streaming the given sensor source through the default output
/// device on a background thread.
pub fn start_stream(
    config: &EngineConfig,
    sensors: Box<dyn SensorSource + Send>,
) -> Result<EngineHandle, ConfigError> {
    let mut scheduler = StreamScheduler::new(config, sensors)?;
    scheduler.start();

    let rb = HeapRb::<Command>::new(64);
    let (prod, cons) = rb.split();
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        audio_io::run_audio_stream(scheduler, cons, rx);
    });
    Ok(EngineHandle {
        commands: prod,
        stop: tx,
    })
}

/// Render a scripted performance to a mono 16-bit WAV file.
pub fn render_wav(
    config: &EngineConfig,
    script: PerformanceData,
    out_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    use hound::{SampleFormat, WavSpec, WavWriter};

    let total_frames = (script.total_duration() * config.sample_rate as f64) as usize;
    let sensors = ScriptedSensors::new(script, config.sample_rate);
    let mut scheduler = StreamScheduler::new(config, Box::new(sensors))?;
    scheduler.start();
    let top = scheduler.top_value();

    let spec = WavSpec {
        channels: 1,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    if let Some(parent) = std::path::Path::new(out_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = WavWriter::create(out_path, spec)?;

    let mut remaining = total_frames;
    let mut buffer = vec![0u16; 512];
    while remaining > 0 {
        let frames = 512.min(remaining);
        buffer.resize(frames, 0);
        scheduler.render(&mut buffer);
        for &duty in &buffer[..frames] {
            let level = audio_io::duty_to_level(duty, top);
            writer.write_sample((level.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        remaining -= frames;
    }

    writer.finalize()?;
    log::info!("rendered {total_frames} frames to {out_path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::render_wav;
    use crate::config::EngineConfig;
    use crate::models::PerformanceData;

    #[test]
    fn render_writes_a_playable_wav() {
        let json = r#"
        {
            "steps": [
                { "duration": 0.05, "levels": [0.4, 0.0, 0.0, 0.0] },
                { "duration": 0.05 }
            ]
        }
        "#;
        let script: PerformanceData = serde_json::from_str(json).unwrap();
        let config = EngineConfig {
            buffer_len: 256,
            ..EngineConfig::default()
        };
        let dir = std::env::temp_dir().join("tone_backend_render_test");
        let path = dir.join("out.wav");
        let path_str = path.to_str().unwrap();
        render_wav(&config, script, path_str).expect("render succeeds");

        let mut reader = hound::WavReader::open(path_str).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, config.sample_rate);
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples.len(), 1600);
        // the touched half sounds, the released half decays to idle level
        assert!(samples[..256].iter().any(|&s| s > 0));
        let _ = std::fs::remove_file(path_str);
    }
}
