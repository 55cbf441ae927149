use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam::channel::Receiver;
use ringbuf::traits::Consumer;

use crate::command::Command;
use crate::scheduler::StreamScheduler;

/// Map a duty-cycle value onto the line level the PWM low-pass would settle
/// at: 0 duty is full negative, the countertop is full positive.
#[inline]
pub fn duty_to_level(duty: u16, top: u16) -> f32 {
    if top == 0 {
        return 0.0;
    }
    (duty as f32 / top as f32).clamp(0.0, 1.0) * 2.0 - 1.0
}

/// Run the output stream until a stop signal arrives. Commands are drained
/// at the top of each callback, then the scheduler renders the next window
/// of duty values, which are converted for the device here.
pub fn run_audio_stream<C>(scheduler: StreamScheduler, cmd_rx: C, stop_rx: Receiver<()>)
where
    C: Consumer<Item = Command> + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .expect("no output device available");
    let supported_config = device.default_output_config().expect("no default config");
    let sample_format = supported_config.sample_format();
    let mut config: StreamConfig = supported_config.clone().into();

    // Use the scheduler's sample rate if it differs from the device default.
    let desired_rate = scheduler.sample_rate();
    if desired_rate != config.sample_rate.0 {
        if let Ok(mut ranges) = device.supported_output_configs() {
            if let Some(range) = ranges.find(|r| {
                r.channels() == config.channels
                    && r.sample_format() == sample_format
                    && r.min_sample_rate().0 <= desired_rate
                    && desired_rate <= r.max_sample_rate().0
            }) {
                config = range
                    .with_sample_rate(cpal::SampleRate(desired_rate))
                    .config();
            } else {
                log::warn!(
                    "sample rate {} not supported, using {}",
                    desired_rate,
                    config.sample_rate.0
                );
            }
        } else {
            log::warn!("could not query supported output configs; using default");
        }
    }

    let channels = config.channels as usize;
    let top = scheduler.top_value();
    let mut sched = scheduler;
    let mut cmds = cmd_rx;
    let mut duty = Vec::new();
    let audio_callback = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        while let Some(cmd) = cmds.try_pop() {
            sched.handle_command(cmd);
        }
        let frames = data.len() / channels;
        if duty.len() != frames {
            duty.resize(frames, 0);
        }
        sched.render(&mut duty);
        for (frame, &value) in data.chunks_mut(channels).zip(duty.iter()) {
            let level = duty_to_level(value, top);
            frame.fill(level);
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &config,
                audio_callback,
                |err| log::error!("stream error: {err}"),
                None,
            )
            .expect("failed to build output stream"),
        _ => panic!("Unsupported sample format"),
    };
    stream.play().unwrap();

    // Keep the stream alive until a stop signal is received
    while stop_rx
        .recv_timeout(std::time::Duration::from_millis(100))
        .is_err()
    {}
}

// The actual stop logic is handled via the channel in `run_audio_stream`.
pub fn stop_audio_stream(sender: &crossbeam::channel::Sender<()>) {
    let _ = sender.send(());
}

#[cfg(test)]
mod tests {
    use super::duty_to_level;

    #[test]
    fn duty_maps_linearly_onto_line_level() {
        assert_eq!(duty_to_level(0, 500), -1.0);
        assert_eq!(duty_to_level(250, 500), 0.0);
        assert_eq!(duty_to_level(500, 500), 1.0);
    }

    #[test]
    fn duty_above_top_clamps_instead_of_wrapping() {
        assert_eq!(duty_to_level(600, 500), 1.0);
        assert_eq!(duty_to_level(1, 0), 0.0);
    }
}
