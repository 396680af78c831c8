use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Sample pairs produced per second by the mixer
pub const SAMPLE_RATE: u32 = 32040;
/// Ring capacity in stereo frames, roughly a quarter second
const CAPACITY: usize = 8192;

struct RingState {
    buffer: Vec<(f32, f32)>,
    read: usize,
    write: usize,
    filled: usize,
}

/// Bounded queue between the frame scheduler and the host audio thread
///
/// Single producer, single consumer, guarded by one lock. Overrun drops the
/// backlog and restarts the cursors, trading an audible tear for latency
/// recovery; underrun hands out silence. Both self-heal and only bump a
/// counter.
pub struct AudioRing {
    state: Mutex<RingState>,
    overruns: AtomicU64,
    underruns: AtomicU64,
}

impl AudioRing {
    pub fn new() -> AudioRing {
        AudioRing {
            state: Mutex::new(RingState {
                buffer: vec![(0.0, 0.0); CAPACITY],
                read: 0,
                write: 0,
                filled: 0,
            }),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    /// Appends a mixed batch, resetting the ring if it cannot fit
    pub fn push_batch(&self, samples: &[(f32, f32)]) {
        let mut state = self.state.lock().unwrap();
        if samples.len() > CAPACITY - state.filled {
            state.read = 0;
            state.write = 0;
            state.filled = 0;
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        for &pair in samples.iter().take(CAPACITY) {
            let write = state.write;
            state.buffer[write] = pair;
            state.write = (write + 1) % CAPACITY;
            state.filled += 1;
        }
    }

    /// Fills `out` with interleaved stereo samples, zero-padding on underrun
    pub fn pull(&self, out: &mut [f32]) {
        let mut state = self.state.lock().unwrap();
        let frames = out.len() / 2;
        let available = state.filled.min(frames);
        for frame in 0..available {
            let read = state.read;
            let (left, right) = state.buffer[read];
            out[frame * 2] = left;
            out[frame * 2 + 1] = right;
            state.read = (read + 1) % CAPACITY;
            state.filled -= 1;
        }
        if available < frames {
            out[available * 2..].fill(0.0);
            // Resynchronize so the next batch starts fresh
            state.read = 0;
            state.write = 0;
            state.filled = 0;
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.lock().unwrap().filled
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Default for AudioRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_in_order() {
        let ring = AudioRing::new();
        ring.push_batch(&[(0.1, -0.1), (0.2, -0.2)]);
        let mut out = [0.0f32; 4];
        ring.pull(&mut out);
        assert_eq!([0.1, -0.1, 0.2, -0.2], out);
    }

    #[test]
    fn underrun_pads_with_silence() {
        let ring = AudioRing::new();
        ring.push_batch(&[(0.5, 0.5)]);
        let mut out = [1.0f32; 6];
        ring.pull(&mut out);
        assert_eq!([0.5, 0.5, 0.0, 0.0, 0.0, 0.0], out);
        assert_eq!(1, ring.underruns());
    }

    #[test]
    fn overrun_resets_and_keeps_latest() {
        let ring = AudioRing::new();
        let big = vec![(0.25, 0.25); CAPACITY];
        ring.push_batch(&big);
        assert_eq!(0, ring.overruns());
        ring.push_batch(&[(0.75, 0.75)]);
        assert_eq!(1, ring.overruns());
        let mut out = [0.0f32; 2];
        ring.pull(&mut out);
        assert_eq!([0.75, 0.75], out);
    }
}
