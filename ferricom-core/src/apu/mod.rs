pub mod dsp;
pub mod mailbox;
pub mod spc700;
pub mod timer;

pub use dsp::Dsp;
pub use mailbox::Mailbox;
pub use spc700::Spc700;
pub use timer::Timer;

const RAM_SIZE: usize = 64 * 1024;
/// Core clock cycles between DSP samples: 1.024 MHz / 32 = 32 kHz
const CYCLES_PER_SAMPLE: u32 = 32;
/// Master clocks per sound-CPU cycle
pub const MASTER_CLOCKS_PER_CYCLE: u32 = 21;

// I/O page registers
const R_CONTROL: u16 = 0x00F1;
const R_DSPADDR: u16 = 0x00F2;
const R_DSPDATA: u16 = 0x00F3;
const R_PORT0: u16 = 0x00F4;
const R_PORT3: u16 = 0x00F7;
const R_TIMER0_TARGET: u16 = 0x00FA;
const R_TIMER2_TARGET: u16 = 0x00FC;
const R_TIMER0_OUT: u16 = 0x00FD;
const R_TIMER2_OUT: u16 = 0x00FF;
const IPL_BASE: u16 = 0xFFC0;

/// Boot ROM at $FFC0: zeroes the zero page, then loops transferring blocks
/// the main CPU hands through the ports until it is told to jump
const IPL_ROM: [u8; 64] = [
    0xCD, 0xEF, 0xBD, 0xE8, 0x00, 0xC6, 0x1D, 0xD0, 0xFC, 0x8F, 0xAA, 0xF4, 0x8F, 0xBB, 0xF5,
    0x78, 0xCC, 0xF4, 0xD0, 0xFB, 0x2F, 0x19, 0xEB, 0xF4, 0xD0, 0xFC, 0x7E, 0xF4, 0xD0, 0x0B,
    0xE4, 0xF5, 0xCB, 0xF4, 0xD7, 0x00, 0xFC, 0xD0, 0xF3, 0xAB, 0x01, 0x10, 0xEF, 0x7E, 0xF4,
    0x10, 0xEB, 0xBA, 0xF6, 0xDA, 0x00, 0xBA, 0xF4, 0xC4, 0xF4, 0xDD, 0x5D, 0xD0, 0xDB, 0x1F,
    0x00, 0x00, 0xC0, 0xFF,
];

/// The sound CPU's private memory and peripherals
pub struct ApuMem {
    pub ram: Box<[u8]>,
    /// IPL ROM readable over the top of RAM while set
    ipl_enabled: bool,
    pub timers: [Timer; 3],
    pub dsp: Dsp,
    dsp_addr: u8,
}

impl ApuMem {
    fn new() -> ApuMem {
        ApuMem {
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
            ipl_enabled: true,
            timers: [Timer::new(128), Timer::new(128), Timer::new(16)],
            dsp: Dsp::new(),
            dsp_addr: 0,
        }
    }

    pub fn read8(&mut self, addr: u16, mailbox: &Mailbox) -> u8 {
        match addr {
            R_CONTROL => 0,
            R_DSPADDR => self.dsp_addr,
            R_DSPDATA => self.dsp.read(self.dsp_addr),
            R_PORT0..=R_PORT3 => mailbox.apu_read((addr - R_PORT0) as usize),
            R_TIMER0_OUT..=R_TIMER2_OUT => {
                self.timers[(addr - R_TIMER0_OUT) as usize].read_output()
            }
            IPL_BASE..=0xFFFF if self.ipl_enabled => IPL_ROM[(addr - IPL_BASE) as usize],
            _ => self.ram[addr as usize],
        }
    }

    pub fn write8(&mut self, addr: u16, value: u8, mailbox: &mut Mailbox) {
        match addr {
            R_CONTROL => {
                for (index, timer) in self.timers.iter_mut().enumerate() {
                    timer.set_enabled(value & (1 << index) != 0);
                }
                if value & 0x10 != 0 {
                    mailbox.clear_pair(0);
                }
                if value & 0x20 != 0 {
                    mailbox.clear_pair(1);
                }
                self.ipl_enabled = value & 0x80 != 0;
            }
            R_DSPADDR => self.dsp_addr = value,
            R_DSPDATA => {
                let ram = &self.ram;
                // Field split keeps the borrow checker happy about the DSP
                // peeking at RAM for key-on
                let (dsp, addr) = (&mut self.dsp, self.dsp_addr);
                dsp.write(addr, value, ram);
            }
            R_PORT0..=R_PORT3 => mailbox.apu_write((addr - R_PORT0) as usize, value),
            R_TIMER0_TARGET..=R_TIMER2_TARGET => {
                self.timers[(addr - R_TIMER0_TARGET) as usize].set_target(value);
            }
            // RAM underneath the IPL ROM stays writable
            _ => self.ram[addr as usize] = value,
        }
    }
}

/// The audio subsystem: core, memory, timers and mixer in lockstep
pub struct Apu {
    pub smp: Spc700,
    pub mem: ApuMem,
    /// Master-clock balance carried between runs, may go negative when an
    /// instruction overshoots its slice
    clock_carry: i64,
    sample_carry: u32,
    /// Stereo pairs mixed since the last drain
    samples: Vec<(f32, f32)>,
}

impl Apu {
    pub fn new() -> Apu {
        Apu {
            smp: Spc700::new(),
            mem: ApuMem::new(),
            clock_carry: 0,
            sample_carry: 0,
            samples: Vec::with_capacity(1024),
        }
    }

    pub fn reset(&mut self) {
        self.smp.reset();
        self.mem = ApuMem::new();
        self.clock_carry = 0;
        self.sample_carry = 0;
        self.samples.clear();
    }

    /// Advances the subsystem by a master-clock slice
    pub fn run(&mut self, master_cycles: u32, mailbox: &mut Mailbox) {
        let mut budget = self.clock_carry + master_cycles as i64;
        while budget > 0 {
            let cycles = self.smp.step(&mut self.mem, mailbox);
            for timer in &mut self.mem.timers {
                timer.step(cycles);
            }
            self.sample_carry += cycles;
            while self.sample_carry >= CYCLES_PER_SAMPLE {
                self.sample_carry -= CYCLES_PER_SAMPLE;
                let ApuMem { dsp, ram, .. } = &mut self.mem;
                let pair = dsp.mix(ram);
                self.samples.push(pair);
            }
            budget -= (cycles * MASTER_CLOCKS_PER_CYCLE) as i64;
        }
        self.clock_carry = budget;
    }

    /// Hands the mixed batch to the scheduler
    pub fn drain_samples(&mut self) -> std::vec::Drain<'_, (f32, f32)> {
        self.samples.drain(..)
    }
}

impl Default for Apu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipl_rom_visible_until_unmapped() {
        let mut mem = ApuMem::new();
        let mut mailbox = Mailbox::new();
        assert_eq!(0xCD, mem.read8(0xFFC0, &mailbox));
        // Writes land in the RAM underneath
        mem.write8(0xFFC0, 0x42, &mut mailbox);
        assert_eq!(0xCD, mem.read8(0xFFC0, &mailbox));
        mem.write8(R_CONTROL, 0x00, &mut mailbox);
        assert_eq!(0x42, mem.read8(0xFFC0, &mailbox));
    }

    #[test]
    fn control_clears_port_pairs() {
        let mut mem = ApuMem::new();
        let mut mailbox = Mailbox::new();
        mailbox.cpu_write(0, 0x11);
        mailbox.cpu_write(2, 0x22);
        mem.write8(R_CONTROL, 0x10, &mut mailbox);
        assert_eq!(0x00, mailbox.apu_read(0));
        assert_eq!(0x22, mailbox.apu_read(2));
    }

    #[test]
    fn boot_rom_runs_and_signals_ready() {
        // The IPL zeroes page zero and writes $AA/$BB to ports 0/1
        let mut apu = Apu::new();
        let mut mailbox = Mailbox::new();
        apu.run(MASTER_CLOCKS_PER_CYCLE * 20_000, &mut mailbox);
        assert_eq!(0xAA, mailbox.cpu_read(0));
        assert_eq!(0xBB, mailbox.cpu_read(1));
    }

    #[test]
    fn dsp_reachable_through_address_port() {
        let mut mem = ApuMem::new();
        let mut mailbox = Mailbox::new();
        mem.write8(R_DSPADDR, 0x0C, &mut mailbox);
        mem.write8(R_DSPDATA, 0x7F, &mut mailbox);
        assert_eq!(0x7F, mem.read8(R_DSPDATA, &mailbox));
    }

    #[test]
    fn timer_output_reads_through_io_page() {
        let mut mem = ApuMem::new();
        let mut mailbox = Mailbox::new();
        mem.write8(R_TIMER2_TARGET, 0x01, &mut mailbox);
        mem.write8(R_CONTROL, 0x84, &mut mailbox);
        mem.timers[2].step(16);
        assert_eq!(0x01, mem.read8(R_TIMER2_OUT, &mailbox));
        assert_eq!(0x00, mem.read8(R_TIMER2_OUT, &mailbox));
    }
}

impl Apu {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.put_bytes(&self.mem.ram);
        w.put_bool(self.mem.ipl_enabled);
        w.put_u8(self.mem.dsp_addr);
        self.smp.save_state(w);
        for timer in &self.mem.timers {
            timer.save_state(w);
        }
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        r.take_bytes(&mut self.mem.ram);
        self.mem.ipl_enabled = r.take_bool();
        self.mem.dsp_addr = r.take_u8();
        self.smp.load_state(r);
        for timer in &mut self.mem.timers {
            timer.load_state(r);
        }
        self.clock_carry = 0;
        self.sample_carry = 0;
        self.samples.clear();
    }
}
