/// One of the three sound-CPU timers
///
/// A timer divides the 1.024 MHz core clock down to its tick rate, counts
/// ticks up to a programmable target and bumps a 4bit output each time the
/// target is hit. Reading the output clears it.
pub struct Timer {
    /// Core clock cycles per timer tick: 128 for the 8 kHz pair, 16 for
    /// the 64 kHz one
    divider: u32,
    accumulated: u32,
    enabled: bool,
    target: u8,
    counter: u8,
    output: u8,
}

impl Timer {
    pub fn new(divider: u32) -> Timer {
        Timer {
            divider,
            accumulated: 0,
            enabled: false,
            target: 0,
            counter: 0,
            output: 0,
        }
    }

    /// Enable edge resets the stage counter and output
    pub fn set_enabled(&mut self, on: bool) {
        if on && !self.enabled {
            self.counter = 0;
            self.output = 0;
        }
        self.enabled = on;
    }

    pub fn set_target(&mut self, target: u8) {
        self.target = target;
    }

    /// Advances by core clock cycles
    pub fn step(&mut self, cycles: u32) {
        if !self.enabled {
            return;
        }
        self.accumulated += cycles;
        while self.accumulated >= self.divider {
            self.accumulated -= self.divider;
            self.counter = self.counter.wrapping_add(1);
            // A zero target counts a full 256 ticks
            if self.counter == self.target {
                self.counter = 0;
                self.output = (self.output + 1) & 0x0F;
            }
        }
    }

    /// Returns the 4bit latch and clears it
    pub fn read_output(&mut self) -> u8 {
        std::mem::take(&mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_to_target() {
        let mut timer = Timer::new(16);
        timer.set_target(2);
        timer.set_enabled(true);
        timer.step(16 * 2);
        assert_eq!(1, timer.read_output());
        assert_eq!(0, timer.read_output());
    }

    #[test]
    fn zero_target_is_256() {
        let mut timer = Timer::new(16);
        timer.set_target(0);
        timer.set_enabled(true);
        timer.step(16 * 255);
        assert_eq!(0, timer.read_output());
        timer.step(16);
        assert_eq!(1, timer.read_output());
    }

    #[test]
    fn output_wraps_at_four_bits() {
        let mut timer = Timer::new(16);
        timer.set_target(1);
        timer.set_enabled(true);
        timer.step(16 * 17);
        assert_eq!(1, timer.read_output());
    }

    #[test]
    fn disabled_timer_holds() {
        let mut timer = Timer::new(128);
        timer.set_target(1);
        timer.step(128 * 4);
        assert_eq!(0, timer.read_output());
    }
}

impl Timer {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.put_u32(self.accumulated);
        w.put_bool(self.enabled);
        w.put_u8(self.target);
        w.put_u8(self.counter);
        w.put_u8(self.output);
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        self.accumulated = r.take_u32();
        self.enabled = r.take_bool();
        self.target = r.take_u8();
        self.counter = r.take_u8();
        self.output = r.take_u8();
    }
}
