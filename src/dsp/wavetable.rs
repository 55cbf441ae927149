/// One period of a sine wave stored as unsigned duty-cycle magnitudes.
///
/// Generated once at startup and shared by every voice; the fixed length is
/// the common basis all phase steps are computed against.
pub struct WaveTable {
    values: Vec<u16>,
    peak: u16,
}

impl WaveTable {
    /// Precompute `len` samples of `round(peak * (sin(2*pi*i/len) + 1) / 2)`.
    ///
    /// Callers validate the length (`len >= 2`) before construction.
    pub fn generate(len: usize, peak: u16) -> Self {
        let mut values = Vec::with_capacity(len);
        for i in 0..len {
            let phase = i as f32 / len as f32 * std::f32::consts::TAU;
            let magnitude = (phase.sin() + 1.0) * 0.5;
            values.push((peak as f32 * magnitude).round() as u16);
        }
        Self { values, peak }
    }

    /// Scale every entry by an integer gain, as the output stage expects
    /// duty values spanning more of the countertop range than the raw table.
    pub fn amplified(mut self, gain: u16) -> Self {
        for v in &mut self.values {
            *v = v.saturating_mul(gain);
        }
        self.peak = self.peak.saturating_mul(gain);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest value the table can hold after gain scaling.
    pub fn peak(&self) -> u16 {
        self.peak
    }

    /// Look up the sample under a fractional phase index, truncating to the
    /// floor. Fractional accumulation stays in the voice; the table never
    /// rounds the phase itself.
    #[inline]
    pub fn lookup(&self, phase: f32) -> u16 {
        self.values[phase as usize]
    }
}
