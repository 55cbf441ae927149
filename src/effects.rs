use crate::dsp;

/// Which post-processing effects the mixer applies. Mutated only by the slow
/// effect-poll path; the mixer reads a copy at each refill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EffectFlags {
    pub tremolo: bool,
    pub reshape: bool,
}

/// Edge-detected toggles driven by the auxiliary touch inputs.
///
/// A flag flips on the rising edge of its aux channel only; holding a pad
/// down must not flap the flag at the polling rate, so the previous state is
/// kept between polls. Aux 0 pairs with tremolo, aux 1 with the reshape
/// timbre.
pub struct EffectToggles {
    flags: EffectFlags,
    prev: [bool; 2],
}

impl EffectToggles {
    pub fn new(initial: EffectFlags) -> Self {
        Self {
            flags: initial,
            prev: [false; 2],
        }
    }

    pub fn flags(&self) -> EffectFlags {
        self.flags
    }

    /// Feed one poll of the aux touch states and return the updated flags.
    pub fn poll(&mut self, aux: &[bool]) -> EffectFlags {
        let tremolo_now = aux.first().copied().unwrap_or(self.prev[0]);
        let reshape_now = aux.get(1).copied().unwrap_or(self.prev[1]);
        if tremolo_now && !self.prev[0] {
            self.flags.tremolo = !self.flags.tremolo;
        }
        if reshape_now && !self.prev[1] {
            self.flags.reshape = !self.flags.reshape;
        }
        self.prev = [tremolo_now, reshape_now];
        self.flags
    }
}

/// Per-sample effect chain state. The tremolo LFO phase advances once per
/// output sample and survives across windows, exactly like a voice's phase
/// accumulator.
pub struct EffectState {
    depth: f32,
    phase_inc: f32,
    phase: f32,
}

impl EffectState {
    pub fn new(tremolo_freq: f32, depth: f32, sample_rate: f32) -> Self {
        Self {
            depth,
            phase_inc: std::f32::consts::TAU * tremolo_freq / sample_rate,
            phase: 0.0,
        }
    }

    /// Apply the enabled effects to one mixed sample, in tremolo-then-reshape
    /// order. Both flags set composes those two branches; there is no
    /// separate combined formula.
    #[inline]
    pub fn process(&mut self, sample: f32, flags: EffectFlags, peak: f32) -> f32 {
        let mut s = sample;
        if flags.tremolo {
            s *= dsp::tremolo_gain(self.phase, self.depth);
        }
        if flags.reshape {
            s = dsp::reshape(s, peak);
        }
        self.step();
        s
    }

    /// Advance the LFO without producing output, used while the window is
    /// silent so the tremolo stays continuous across idle gaps.
    pub fn advance(&mut self, samples: usize) {
        for _ in 0..samples {
            self.step();
        }
    }

    #[inline]
    fn step(&mut self) {
        self.phase += self.phase_inc;
        if self.phase >= std::f32::consts::TAU {
            self.phase -= std::f32::consts::TAU;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EffectFlags, EffectState, EffectToggles};

    #[test]
    fn toggle_flips_on_rising_edge_only() {
        let mut toggles = EffectToggles::new(EffectFlags::default());
        assert!(!toggles.poll(&[true, false]).reshape);
        assert!(toggles.flags().tremolo);
        // held down: no further flips
        toggles.poll(&[true, false]);
        toggles.poll(&[true, false]);
        assert!(toggles.flags().tremolo);
        // release then press again flips back
        toggles.poll(&[false, false]);
        assert!(!toggles.poll(&[true, false]).tremolo);
    }

    #[test]
    fn aux_channels_map_to_their_own_flags() {
        let mut toggles = EffectToggles::new(EffectFlags::default());
        let flags = toggles.poll(&[false, true]);
        assert!(!flags.tremolo);
        assert!(flags.reshape);
    }

    #[test]
    fn combined_flags_compose_the_two_single_paths() {
        let sample_rate = 16000.0;
        let peak = 998.0;
        let both = EffectFlags {
            tremolo: true,
            reshape: true,
        };
        let mut combined = EffectState::new(5.0, 0.5, sample_rate);
        let mut tremolo_only = EffectState::new(5.0, 0.5, sample_rate);
        for i in 0..256 {
            let input = (i % 17) as f32 * 40.0;
            let got = combined.process(input, both, peak);
            let after_tremolo = tremolo_only.process(
                input,
                EffectFlags {
                    tremolo: true,
                    reshape: false,
                },
                peak,
            );
            let expected = crate::dsp::reshape(after_tremolo, peak);
            assert!((got - expected).abs() < 1e-3, "sample {i}");
        }
    }

    #[test]
    fn lfo_phase_persists_across_windows() {
        let mut streamed = EffectState::new(7.0, 1.0, 8000.0);
        let mut whole = EffectState::new(7.0, 1.0, 8000.0);
        let flags = EffectFlags {
            tremolo: true,
            reshape: false,
        };
        let mut out_streamed = Vec::new();
        for _ in 0..4 {
            for _ in 0..100 {
                out_streamed.push(streamed.process(500.0, flags, 998.0));
            }
        }
        let out_whole: Vec<f32> = (0..400).map(|_| whole.process(500.0, flags, 998.0)).collect();
        for (a, b) in out_streamed.iter().zip(&out_whole) {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
