use crate::command::{Command, EngineEvent, EventQueue};
use crate::config::{ConfigError, EngineConfig};
use crate::dsp::wavetable::WaveTable;
use crate::effects::{EffectFlags, EffectState, EffectToggles};
use crate::sensors::{ChannelReading, FrequencyMapping, SensorMapper, SensorSource};
use crate::voices::VoiceMixer;

/// Number of auxiliary effect-toggle pads polled by the slow tick.
const AUX_PADS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Filling(usize),
    Playing(usize),
}

/// Owns the ping-pong duty buffers and drives refills from the engine event
/// queue.
///
/// All work happens on the audio execution context: the playback path copies
/// duty values out of the playing buffer, raises a drain event at each
/// buffer boundary, and the pump refills the writable buffer before the
/// cursor reaches it. The buffer being played is never written; the state
/// machine's indices are the discipline, not a lock.
pub struct StreamScheduler {
    mixer: VoiceMixer,
    mapper: SensorMapper,
    toggles: EffectToggles,
    sensors: Box<dyn SensorSource + Send>,
    buffers: [Vec<u16>; 2],
    state: PlaybackState,
    play_pos: usize,
    double_buffer: bool,
    events: EventQueue,
    readings: Vec<ChannelReading>,
    aux_scratch: [bool; AUX_PADS],
    paused: bool,
    sample_rate: u32,
    top: u16,
    effect_period: usize,
    effect_countdown: usize,
    idle_period: usize,
    idle_countdown: usize,
    underruns: u64,
    absolute_sample: u64,
}

impl StreamScheduler {
    /// Build a scheduler from a validated configuration. Any configuration
    /// that could miss the refill deadline is rejected here, before any
    /// audio starts.
    pub fn new(
        config: &EngineConfig,
        sensors: Box<dyn SensorSource + Send>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let table = WaveTable::generate(config.table_len, config.peak_amplitude())
            .amplified(config.table_gain);
        let sample_rate = config.sample_rate as f32;
        let mixer = VoiceMixer::new(
            table,
            sample_rate,
            config.top_value(),
            config.idle_duty,
            config.master_gain,
            config.channels.len(),
            EffectState::new(config.tremolo_freq, config.tremolo_depth, sample_rate),
        );
        let mapper = SensorMapper::new(
            config.activation_threshold,
            FrequencyMapping::from_name(&config.mapping),
            config.channels.clone(),
        );
        let toggles = EffectToggles::new(EffectFlags {
            tremolo: config.tremolo_enabled,
            reshape: config.reshape_enabled,
        });

        let effect_period = (sample_rate / config.effect_poll_hz).round().max(1.0) as usize;
        let idle_period = (sample_rate / config.idle_poll_hz).round().max(1.0) as usize;

        Ok(Self {
            mixer,
            mapper,
            toggles,
            sensors,
            buffers: [
                vec![config.idle_duty; config.buffer_len],
                vec![config.idle_duty; config.buffer_len],
            ],
            state: PlaybackState::Idle,
            play_pos: 0,
            double_buffer: config.double_buffer,
            events: EventQueue::new(),
            readings: Vec::new(),
            aux_scratch: [false; AUX_PADS],
            paused: false,
            sample_rate: config.sample_rate,
            top: config.top_value(),
            effect_period,
            effect_countdown: effect_period,
            idle_period,
            idle_countdown: idle_period,
            underruns: 0,
            absolute_sample: 0,
        })
    }

    /// Fill buffer 0 from the current sensor state and begin playback.
    pub fn start(&mut self) {
        self.refill(0);
        self.state = PlaybackState::Playing(0);
        self.play_pos = 0;
        log::info!(
            "playback started: {} Hz, {}-sample buffers, {}",
            self.sample_rate,
            self.buffers[0].len(),
            if self.double_buffer {
                "ping-pong"
            } else {
                "single buffer"
            }
        );
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn top_value(&self) -> u16 {
        self.top
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn effect_flags(&self) -> EffectFlags {
        self.toggles.flags()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn elapsed_samples(&self) -> u64 {
        self.absolute_sample
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SetPaused(p) => {
                if p {
                    self.pause();
                } else {
                    self.resume();
                }
            }
            Command::SetMasterGain(gain) => self.mixer.set_master_gain(gain),
        }
    }

    /// Host-facing event entry: peripheral drain notifications and external
    /// timer ticks land here and are serviced immediately, in priority
    /// order.
    pub fn notify(&mut self, event: EngineEvent) {
        self.events.push(event);
        self.pump();
    }

    /// Produce the next `out.len()` duty-cycle values.
    pub fn render(&mut self, out: &mut [u16]) {
        let mut filled = 0;
        while filled < out.len() {
            if self.paused {
                let idle = self.mixer.idle_duty();
                out[filled..].fill(idle);
                return;
            }
            let remaining = out.len() - filled;
            match self.state {
                PlaybackState::Playing(index) => {
                    let buffer = &self.buffers[index];
                    let n = remaining.min(buffer.len() - self.play_pos);
                    out[filled..filled + n]
                        .copy_from_slice(&buffer[self.play_pos..self.play_pos + n]);
                    self.play_pos += n;
                    filled += n;
                    self.clock(n);
                    if self.play_pos >= self.buffers[index].len() {
                        self.play_pos = 0;
                        self.events.push(EngineEvent::BufferDrained { buffer: index });
                    }
                    self.pump();
                }
                PlaybackState::Idle => {
                    let n = remaining.min(self.idle_countdown.max(1));
                    let idle = self.mixer.idle_duty();
                    out[filled..filled + n].fill(idle);
                    filled += n;
                    self.clock(n);
                    self.pump();
                }
                PlaybackState::Filling(index) => {
                    // A fill normally completes inside the pump before the
                    // cursor returns; landing here means the drain outpaced
                    // the refill.
                    self.underruns += 1;
                    log::warn!("buffer {index} drained before its refill finished");
                    self.finish_fill(index);
                }
            }
        }
        self.absolute_sample += out.len() as u64;
    }

    /// Advance the tick clocks by `samples` consumed output samples.
    fn clock(&mut self, samples: usize) {
        self.sensors.advance(samples);
        if self.effect_countdown <= samples {
            self.events.push(EngineEvent::EffectTick);
            self.effect_countdown = self.effect_period;
        } else {
            self.effect_countdown -= samples;
        }
        if self.state == PlaybackState::Idle {
            if self.idle_countdown <= samples {
                self.events.push(EngineEvent::SampleTick);
                self.idle_countdown = self.idle_period;
            } else {
                self.idle_countdown -= samples;
            }
        }
    }

    /// Drain the event queue, fast lane first, each handler running to
    /// completion.
    fn pump(&mut self) {
        while let Some(event) = self.events.pop() {
            match event {
                EngineEvent::BufferDrained { buffer } => self.handle_drained(buffer),
                EngineEvent::SampleTick => self.handle_sample_tick(),
                EngineEvent::EffectTick => self.handle_effect_tick(),
            }
        }
    }

    fn handle_drained(&mut self, buffer: usize) {
        if buffer >= self.buffers.len() {
            log::warn!("drain for unknown buffer {buffer} ignored");
            return;
        }
        let playing = match self.state {
            PlaybackState::Playing(index) => index,
            PlaybackState::Filling(index) => {
                self.underruns += 1;
                log::warn!("drain for buffer {buffer} arrived while {index} was filling");
                index
            }
            PlaybackState::Idle => {
                log::debug!("stale drain for buffer {buffer} while idle");
                return;
            }
        };
        if buffer != playing {
            self.underruns += 1;
            log::warn!("out-of-order drain: buffer {buffer} reported, {playing} playing");
        }
        let next = if self.double_buffer { 1 - buffer } else { buffer };
        self.state = PlaybackState::Filling(next);
        self.finish_fill(next);
    }

    fn finish_fill(&mut self, target: usize) {
        let silent = self.refill(target);
        self.play_pos = 0;
        if silent {
            self.state = PlaybackState::Idle;
            self.flush_output();
            log::info!("all channels quiet; output idled");
        } else {
            self.state = PlaybackState::Playing(target);
        }
    }

    /// Sample the sensors and mix one window into the target buffer.
    /// Returns true when every channel was inactive.
    fn refill(&mut self, target: usize) -> bool {
        self.mapper
            .read_into(self.sensors.as_mut(), &mut self.readings);
        let flags = self.toggles.flags();
        self.mixer
            .mix_window(&self.readings, flags, &mut self.buffers[target]);
        !self.readings.iter().any(|r| r.active)
    }

    /// Neutralize both buffers so no stale tone replays after idle.
    fn flush_output(&mut self) {
        let idle = self.mixer.idle_duty();
        for buffer in &mut self.buffers {
            buffer.fill(idle);
        }
    }

    fn handle_sample_tick(&mut self) {
        if self.state != PlaybackState::Idle {
            return;
        }
        self.mapper
            .read_into(self.sensors.as_mut(), &mut self.readings);
        if self.readings.iter().any(|r| r.active) {
            log::info!("touch detected; resuming playback");
            let flags = self.toggles.flags();
            self.mixer
                .mix_window(&self.readings, flags, &mut self.buffers[0]);
            self.state = PlaybackState::Playing(0);
            self.play_pos = 0;
        }
    }

    fn handle_effect_tick(&mut self) {
        for (index, slot) in self.aux_scratch.iter_mut().enumerate() {
            match self.sensors.aux_pressed(index) {
                Ok(pressed) => *slot = pressed,
                Err(err) => log::warn!("aux pad {index}: {err}; holding last state"),
            }
        }
        let aux = self.aux_scratch;
        self.toggles.poll(&aux);
    }
}

#[cfg(test)]
mod tests {
    use super::{PlaybackState, StreamScheduler};
    use crate::command::EngineEvent;
    use crate::config::EngineConfig;
    use crate::effects::{EffectFlags, EffectState};
    use crate::sensors::{ChannelReading, SensorReadError, SensorSource};
    use crate::voices::VoiceMixer;

    /// Sensor stub with piecewise-constant levels switched at a sample
    /// position, mirroring how a finger lands on and leaves the ribbon.
    struct SteppedSensors {
        before: Vec<f32>,
        after: Vec<f32>,
        switch_at: u64,
        aux: [bool; 2],
        position: u64,
    }

    impl SteppedSensors {
        fn constant(levels: Vec<f32>) -> Self {
            Self {
                before: levels.clone(),
                after: levels,
                switch_at: u64::MAX,
                aux: [false; 2],
                position: 0,
            }
        }

        fn switching(before: Vec<f32>, after: Vec<f32>, switch_at: u64) -> Self {
            Self {
                before,
                after,
                switch_at,
                aux: [false; 2],
                position: 0,
            }
        }

        fn levels(&self) -> &[f32] {
            if self.position >= self.switch_at {
                &self.after
            } else {
                &self.before
            }
        }
    }

    impl SensorSource for SteppedSensors {
        fn sample_channel(&mut self, channel: usize) -> Result<f32, SensorReadError> {
            Ok(self.levels().get(channel).copied().unwrap_or(0.0))
        }

        fn aux_pressed(&mut self, index: usize) -> Result<bool, SensorReadError> {
            Ok(self.aux.get(index).copied().unwrap_or(false))
        }

        fn advance(&mut self, frames: usize) {
            self.position += frames as u64;
        }
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            buffer_len: 256,
            table_len: 128,
            ..EngineConfig::default()
        }
    }

    fn touched() -> Vec<f32> {
        vec![0.27, 0.0, 0.0, 0.0]
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; 4]
    }

    #[test]
    fn start_fills_buffer_zero_and_plays() {
        let cfg = small_config();
        let mut sched =
            StreamScheduler::new(&cfg, Box::new(SteppedSensors::constant(touched()))).unwrap();
        sched.start();
        assert_eq!(sched.state(), PlaybackState::Playing(0));
        let mut out = vec![0u16; 64];
        sched.render(&mut out);
        assert!(out.iter().any(|&v| v != cfg.idle_duty));
    }

    #[test]
    fn handoff_between_buffers_preserves_phase() {
        let cfg = small_config();
        let mut sched =
            StreamScheduler::new(&cfg, Box::new(SteppedSensors::constant(touched()))).unwrap();
        sched.start();
        // span several drain boundaries in odd-sized chunks
        let mut stitched = Vec::new();
        for chunk in [100usize, 300, 256, 44, 68] {
            let mut out = vec![0u16; chunk];
            sched.render(&mut out);
            stitched.extend_from_slice(&out);
        }

        // reference: the same mix as one gapless stream of whole windows
        let table = crate::dsp::wavetable::WaveTable::generate(cfg.table_len, cfg.peak_amplitude())
            .amplified(cfg.table_gain);
        let mut mixer = VoiceMixer::new(
            table,
            cfg.sample_rate as f32,
            cfg.top_value(),
            cfg.idle_duty,
            cfg.master_gain,
            4,
            EffectState::new(cfg.tremolo_freq, cfg.tremolo_depth, cfg.sample_rate as f32),
        );
        let readings = [
            ChannelReading {
                active: true,
                // same f32 expression the mapper evaluates for a 0.27 V read
                frequency: 82.0 + (0.27f32 - 0.17) * 246.0,
            },
            ChannelReading::default(),
            ChannelReading::default(),
            ChannelReading::default(),
        ];
        let mut reference = Vec::new();
        while reference.len() < stitched.len() {
            let mut window = vec![0u16; cfg.buffer_len];
            mixer.mix_window(&readings, EffectFlags::default(), &mut window);
            reference.extend_from_slice(&window);
        }
        assert_eq!(&reference[..stitched.len()], &stitched[..]);
        assert_eq!(sched.underruns(), 0);
    }

    #[test]
    fn single_buffer_mode_is_also_gapless() {
        let cfg = EngineConfig {
            double_buffer: false,
            ..small_config()
        };
        let mut sched =
            StreamScheduler::new(&cfg, Box::new(SteppedSensors::constant(touched()))).unwrap();
        sched.start();
        let mut a = vec![0u16; 256];
        let mut b = vec![0u16; 256];
        sched.render(&mut a);
        sched.render(&mut b);
        assert_eq!(sched.state(), PlaybackState::Playing(0));
        assert_ne!(a, vec![cfg.idle_duty; 256]);
        // second window continues the tone rather than restarting it
        assert_ne!(a, b);
    }

    #[test]
    fn sustained_silence_idles_and_flushes() {
        let cfg = small_config();
        let mut sched = StreamScheduler::new(
            &cfg,
            Box::new(SteppedSensors::switching(touched(), quiet(), 128)),
        )
        .unwrap();
        sched.start();
        let mut out = vec![0u16; 512];
        sched.render(&mut out);
        assert_eq!(sched.state(), PlaybackState::Idle);
        // everything after the first drained buffer is idle duty
        assert!(out[256..].iter().all(|&v| v == cfg.idle_duty));
    }

    #[test]
    fn touch_while_idle_restarts_playback() {
        let cfg = small_config();
        let mut sched = StreamScheduler::new(
            &cfg,
            Box::new(SteppedSensors::switching(quiet(), touched(), 512)),
        )
        .unwrap();
        sched.start();
        let mut out = vec![0u16; 256];
        sched.render(&mut out);
        assert_eq!(sched.state(), PlaybackState::Idle);

        // render past the switch point and the idle poll period
        let mut out = vec![0u16; 2048];
        sched.render(&mut out);
        assert!(matches!(sched.state(), PlaybackState::Playing(_)));
        assert!(out.iter().any(|&v| v != cfg.idle_duty));
    }

    #[test]
    fn out_of_order_drain_is_counted_not_fatal() {
        let cfg = small_config();
        let mut sched =
            StreamScheduler::new(&cfg, Box::new(SteppedSensors::constant(touched()))).unwrap();
        sched.start();
        sched.notify(EngineEvent::BufferDrained { buffer: 1 });
        assert_eq!(sched.underruns(), 1);
        assert_eq!(sched.state(), PlaybackState::Playing(0));
        let mut out = vec![0u16; 64];
        sched.render(&mut out);
        assert!(out.iter().any(|&v| v != cfg.idle_duty));
    }

    #[test]
    fn aux_press_toggles_effects_on_the_slow_tick() {
        let cfg = small_config();
        let mut source = SteppedSensors::constant(touched());
        source.aux = [true, false];
        let mut sched = StreamScheduler::new(&cfg, Box::new(source)).unwrap();
        sched.start();
        assert!(!sched.effect_flags().tremolo);
        // one slow-tick period at 10 Hz is sample_rate / 10 samples
        let mut out = vec![0u16; (cfg.sample_rate / 10) as usize + 64];
        sched.render(&mut out);
        assert!(sched.effect_flags().tremolo);
        assert!(!sched.effect_flags().reshape);
    }

    #[test]
    fn pause_emits_idle_and_freezes_the_clock() {
        let cfg = small_config();
        let mut sched =
            StreamScheduler::new(&cfg, Box::new(SteppedSensors::constant(touched()))).unwrap();
        sched.start();
        sched.pause();
        let elapsed = sched.elapsed_samples();
        let mut out = vec![99u16; 128];
        sched.render(&mut out);
        assert!(out.iter().all(|&v| v == cfg.idle_duty));
        assert_eq!(sched.elapsed_samples(), elapsed);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let cfg = EngineConfig {
            table_len: 4096,
            buffer_len: 512,
            ..EngineConfig::default()
        };
        assert!(StreamScheduler::new(&cfg, Box::new(SteppedSensors::constant(quiet()))).is_err());
    }
}
