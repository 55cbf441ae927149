use crate::dsp::wavetable::WaveTable;
use crate::effects::{EffectFlags, EffectState};
use crate::sensors::ChannelReading;

/// One sounding note: a channel's target frequency plus its position inside
/// the shared wave table.
#[derive(Clone, Copy, Debug)]
pub struct Voice {
    pub channel: usize,
    pub frequency: f32,
    pub phase: f32,
}

impl Voice {
    /// Table indices to advance per output sample:
    /// (table-entries/cycle) * (cycles/second) / (samples/second).
    #[inline]
    pub fn step_size(&self, table_len: f32, sample_rate: f32) -> f32 {
        table_len * self.frequency / sample_rate
    }
}

/// Sums the active voices into one window of duty-cycle values.
///
/// Phase accumulators are keyed by physical channel and persist between
/// windows, so a note held across a refill boundary continues from its
/// residual phase instead of popping back to the table start. A channel
/// that re-activates after silence starts a fresh cycle at index zero.
pub struct VoiceMixer {
    table: WaveTable,
    sample_rate: f32,
    top: u16,
    idle_duty: u16,
    master_gain: f32,
    phases: Vec<f32>,
    was_active: Vec<bool>,
    effects: EffectState,
    sum: Vec<f32>,
}

impl VoiceMixer {
    pub fn new(
        table: WaveTable,
        sample_rate: f32,
        top: u16,
        idle_duty: u16,
        master_gain: f32,
        channel_count: usize,
        effects: EffectState,
    ) -> Self {
        Self {
            table,
            sample_rate,
            top,
            idle_duty,
            master_gain,
            phases: vec![0.0; channel_count],
            was_active: vec![false; channel_count],
            effects,
            sum: Vec::new(),
        }
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.clamp(0.0, 1.0);
    }

    pub fn idle_duty(&self) -> u16 {
        self.idle_duty
    }

    /// Phase accumulator for a channel, exposed for continuity checks.
    pub fn phase(&self, channel: usize) -> f32 {
        self.phases[channel]
    }

    /// Fill `out` with one window mixed from the given readings under the
    /// given effect flags.
    pub fn mix_window(&mut self, readings: &[ChannelReading], flags: EffectFlags, out: &mut [u16]) {
        let table_len = self.table.len() as f32;
        if self.sum.len() != out.len() {
            self.sum.resize(out.len(), 0.0);
        }
        self.sum.fill(0.0);

        let mut active_count = 0u32;
        for (ch, reading) in readings.iter().enumerate() {
            if ch >= self.phases.len() {
                break;
            }
            if !reading.active || reading.frequency <= 0.0 {
                self.was_active[ch] = false;
                self.phases[ch] = 0.0;
                continue;
            }
            let voice = Voice {
                channel: ch,
                frequency: reading.frequency,
                phase: if self.was_active[ch] { self.phases[ch] } else { 0.0 },
            };
            let step = voice.step_size(table_len, self.sample_rate);
            let mut phase = voice.phase;
            for slot in self.sum.iter_mut() {
                *slot += self.table.lookup(phase) as f32;
                phase += step;
                if phase >= table_len {
                    phase -= table_len;
                }
            }
            self.phases[ch] = phase;
            self.was_active[ch] = true;
            active_count += 1;
        }

        if active_count == 0 {
            out.fill(self.idle_duty);
            self.effects.advance(out.len());
            return;
        }

        // Real division by voice count, rounded at the duty conversion; the
        // sum of k full-scale voices lands back at single-voice level.
        let scale = self.master_gain / active_count as f32;
        let peak = self.table.peak() as f32;
        let top = self.top as f32;
        for (slot, &acc) in out.iter_mut().zip(self.sum.iter()) {
            let mixed = acc * scale;
            let shaped = self.effects.process(mixed, flags, peak);
            *slot = shaped.round().clamp(0.0, top) as u16;
        }
    }
}
