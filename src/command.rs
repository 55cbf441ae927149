use std::collections::VecDeque;

/// Control messages pushed from other threads through the lock-free command
/// queue and drained at the top of each audio callback.
#[derive(Debug)]
pub enum Command {
    /// Pause or resume playback
    SetPaused(bool),
    /// Adjust the master output gain (0.0 - 1.0)
    SetMasterGain(f32),
}

/// Triggers the scheduler reacts to, all raised and consumed on the audio
/// execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The playback cursor finished consuming a buffer.
    BufferDrained { buffer: usize },
    /// Fast periodic tick; re-checks the sensors while idle.
    SampleTick,
    /// Slow periodic tick; polls the aux pads for effect toggles.
    EffectTick,
}

impl EngineEvent {
    fn is_fast(self) -> bool {
        !matches!(self, EngineEvent::EffectTick)
    }
}

/// Two-lane queue: fast events (buffer drains, sample ticks) always drain
/// before slow ones, so an effect poll can never interleave with a refill
/// in progress.
#[derive(Default)]
pub struct EventQueue {
    fast: VecDeque<EngineEvent>,
    slow: VecDeque<EngineEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EngineEvent) {
        if event.is_fast() {
            self.fast.push_back(event);
        } else {
            self.slow.push_back(event);
        }
    }

    pub fn pop(&mut self) -> Option<EngineEvent> {
        self.fast.pop_front().or_else(|| self.slow.pop_front())
    }

    pub fn len(&self) -> usize {
        self.fast.len() + self.slow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fast.is_empty() && self.slow.is_empty()
    }

    pub fn clear(&mut self) {
        self.fast.clear();
        self.slow.clear();
    }
}
