use crate::bus::{page_wrapping_add, Bus};

// Interrupt vectors
/// Native mode co-processor vector
const VEC_COP: u32 = 0x00FFE4;
/// Native mode BRK vector
const VEC_BRK: u32 = 0x00FFE6;
/// Native mode non-maskable interrupt, raised at vblank
const VEC_NMI: u32 = 0x00FFEA;
/// Native mode interrupt request
const VEC_IRQ: u32 = 0x00FFEE;
/// Emulation mode co-processor vector
const VEC_COP_EMU: u32 = 0x00FFF4;
/// Emulation mode non-maskable interrupt
const VEC_NMI_EMU: u32 = 0x00FFFA;
/// Reset vector, execution starts here
const VEC_RESET: u32 = 0x00FFFC;
/// Emulation mode IRQ and BRK share a vector
const VEC_IRQ_BRK_EMU: u32 = 0x00FFFE;

// Status register masks
const P_C: u8 = 0x01;
const P_Z: u8 = 0x02;
const P_I: u8 = 0x04;
const P_D: u8 = 0x08;
const P_X: u8 = 0x10;
const P_M: u8 = 0x20;
const P_V: u8 = 0x40;
const P_N: u8 = 0x80;

/// How the bytes following an effective address wrap
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Wrap {
    Page,
    Bank,
    Space,
}

/// An effective data address with its wrapping rule
pub type Ea = (u32, Wrap);

/// Processor status flags
#[derive(Clone)]
pub struct StatusReg {
    pub n: bool,
    pub v: bool,
    /// Accumulator/memory width, set = 8bit
    pub m: bool,
    /// Index register width, set = 8bit
    pub x: bool,
    /// Decimal mode for ADC/SBC
    pub d: bool,
    /// IRQ disable
    pub i: bool,
    pub z: bool,
    pub c: bool,
}

impl StatusReg {
    fn new() -> StatusReg {
        StatusReg {
            n: false,
            v: false,
            m: true,
            x: true,
            d: false,
            i: true,
            z: false,
            c: false,
        }
    }

    pub fn value(&self) -> u8 {
        (self.c as u8)
            | (self.z as u8) << 1
            | (self.i as u8) << 2
            | (self.d as u8) << 3
            | (self.x as u8) << 4
            | (self.m as u8) << 5
            | (self.v as u8) << 6
            | (self.n as u8) << 7
    }

    pub fn set_value(&mut self, value: u8) {
        self.c = value & P_C != 0;
        self.z = value & P_Z != 0;
        self.i = value & P_I != 0;
        self.d = value & P_D != 0;
        self.x = value & P_X != 0;
        self.m = value & P_M != 0;
        self.v = value & P_V != 0;
        self.n = value & P_N != 0;
    }

    fn set_mask(&mut self, mask: u8) {
        self.set_value(self.value() | mask);
    }

    fn clear_mask(&mut self, mask: u8) {
        self.set_value(self.value() & !mask);
    }
}

/// The 65816 core of the console's main processor
///
/// Register widths follow the `M`/`X` flags and the emulation bit: while
/// either forces 8 bits the hidden high bytes of the registers stay zeroed,
/// and in emulation mode the stack is pinned to page `$01`.
pub struct Cpu {
    pub a: u16,
    pub x: u16,
    pub y: u16,
    pub pc: u16,
    pub s: u16,
    pub d: u16,
    pub pb: u8,
    pub db: u8,
    pub p: StatusReg,
    pub e: bool,
    /// STP was executed, only reset recovers
    stopped: bool,
    /// WAI was executed, an interrupt resumes
    waiting: bool,
}

impl Cpu {
    /// Powers on in emulation mode at the reset vector
    pub fn new(bus: &mut Bus) -> Cpu {
        let mut cpu = Cpu {
            a: 0,
            x: 0,
            y: 0,
            pc: 0,
            s: 0x01FF,
            d: 0,
            pb: 0,
            db: 0,
            p: StatusReg::new(),
            e: true,
            stopped: false,
            waiting: false,
        };
        cpu.reset(bus);
        cpu
    }

    pub fn reset(&mut self, bus: &mut Bus) {
        self.s = 0x01FF;
        self.d = 0;
        self.pb = 0;
        self.db = 0;
        self.p = StatusReg::new();
        self.e = true;
        self.stopped = false;
        self.waiting = false;
        let vector = bus.page_wrapping_read16(VEC_RESET);
        self.pc = if vector == 0 { 0x8000 } else { vector };
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn waiting(&self) -> bool {
        self.waiting
    }

    pub fn current_address(&self) -> u32 {
        ((self.pb as u32) << 16) | self.pc as u32
    }

    /// Takes the non-maskable interrupt
    pub fn nmi(&mut self, bus: &mut Bus) {
        self.waiting = false;
        self.interrupt(bus, VEC_NMI, VEC_NMI_EMU);
    }

    /// Takes a level-triggered IRQ if interrupts are enabled
    pub fn irq(&mut self, bus: &mut Bus) -> bool {
        self.waiting = false;
        if self.p.i {
            return false;
        }
        self.interrupt(bus, VEC_IRQ, VEC_IRQ_BRK_EMU);
        true
    }

    fn interrupt(&mut self, bus: &mut Bus, native_vector: u32, emu_vector: u32) {
        if !self.e {
            let pb = self.pb;
            self.push8(pb, bus);
        }
        let pc = self.pc;
        self.push16(pc, bus);
        let p = self.p.value();
        self.push8(p, bus);
        self.p.i = true;
        self.p.d = false;
        self.pb = 0x00;
        self.pc = bus.page_wrapping_read16(if self.e { emu_vector } else { native_vector });
    }

    /// Runs one instruction and returns the CPU cycles it consumed
    ///
    /// Halt states idle at a fixed cost so the scheduler keeps advancing
    /// the rest of the machine.
    pub fn step(&mut self, bus: &mut Bus) -> u8 {
        if self.stopped || self.waiting {
            return 2;
        }
        let addr = self.current_address();
        let opcode = bus.read8(addr);

        // Runs op_func on the address the mode resolves, stepping pc
        macro_rules! op {
            ($mode:ident, $op_func:ident, $length:expr, $cycles:expr) => {{
                let ea = self.$mode(addr, bus);
                self.$op_func(&ea, bus);
                self.pc = self.pc.wrapping_add($length);
                $cycles
            }};
        }

        // As op!, plus one cycle when indexing crosses a page in native mode
        // or with 16bit indices
        macro_rules! op_px {
            ($mode:ident, $base:ident, $op_func:ident, $length:expr, $cycles:expr) => {{
                let ea = self.$mode(addr, bus);
                let base = self.$base(addr, bus);
                let crossed = ea.0 & 0xFFFF00 != base.0 & 0xFFFF00;
                self.$op_func(&ea, bus);
                self.pc = self.pc.wrapping_add($length);
                $cycles + (!self.p.x || crossed) as u8
            }};
        }

        // Register increment/decrement at the current register width
        macro_rules! step_reg {
            ($narrow:expr, $reg:expr, $op:ident) => {{
                if $narrow {
                    let value = ($reg as u8).$op(1);
                    $reg = value as u16;
                    self.p.n = value > 0x7F;
                    self.p.z = value == 0;
                } else {
                    $reg = $reg.$op(1);
                    self.p.n = $reg > 0x7FFF;
                    self.p.z = $reg == 0;
                }
                self.pc = self.pc.wrapping_add(1);
                2
            }};
        }

        // Conditional branch over a signed 8bit offset
        macro_rules! branch {
            ($condition:expr) => {{
                if $condition {
                    let old_pc = self.pc;
                    self.pc = self.rel8(addr, bus).0 as u16;
                    if self.e && (self.pc & 0xFF00 != old_pc & 0xFF00) {
                        4
                    } else {
                        3
                    }
                } else {
                    self.pc = self.pc.wrapping_add(2);
                    2
                }
            }};
        }

        macro_rules! flag {
            ($field:ident, $value:expr) => {{
                self.p.$field = $value;
                self.pc = self.pc.wrapping_add(1);
                2
            }};
        }

        // Accumulator-operand shifts and rotates
        macro_rules! shift_a {
            ($op8:ident, $op16:ident) => {{
                if self.p.m {
                    let result = self.$op8(self.a as u8);
                    self.a = (self.a & 0xFF00) | result as u16;
                } else {
                    self.a = self.$op16(self.a);
                }
                self.pc = self.pc.wrapping_add(1);
                2
            }};
        }

        macro_rules! push_reg {
            ($narrow:expr, $value:expr, $cycles:expr) => {{
                if $narrow {
                    let value = $value as u8;
                    self.push8(value, bus);
                } else {
                    let value = $value;
                    self.push16(value, bus);
                }
                self.pc = self.pc.wrapping_add(1);
                $cycles
            }};
        }

        macro_rules! pull_reg {
            ($narrow:expr, $reg:expr, $cycles:expr) => {{
                if $narrow {
                    let value = self.pull8(bus);
                    $reg = ($reg & 0xFF00) | value as u16;
                    self.p.n = value > 0x7F;
                    self.p.z = value == 0;
                } else {
                    let value = self.pull16(bus);
                    $reg = value;
                    self.p.n = value > 0x7FFF;
                    self.p.z = value == 0;
                }
                self.pc = self.pc.wrapping_add(1);
                $cycles
            }};
        }

        // Register-to-register moves at the destination's width
        macro_rules! transfer {
            ($narrow:expr, $source:expr, $dest:expr) => {{
                let source = $source;
                if $narrow {
                    $dest = ($dest & 0xFF00) | (source & 0x00FF);
                    self.p.n = source as u8 > 0x7F;
                    self.p.z = source as u8 == 0;
                } else {
                    $dest = source;
                    self.p.n = source > 0x7FFF;
                    self.p.z = source == 0;
                }
                self.pc = self.pc.wrapping_add(1);
                2
            }};
        }

        // One cycle less when the direct page is aligned
        let dl = (self.d & 0x00FF != 0) as u8;
        let e = self.e as u8;
        let m = self.p.m as u8;
        let x = self.p.x as u8;

        match opcode {
            // ADC
            0x61 => op!(dir_x_ptr, op_adc, 2, 7 - m + dl),
            0x63 => op!(stack_rel, op_adc, 2, 5 - m),
            0x65 => op!(dir, op_adc, 2, 4 - m + dl),
            0x67 => op!(dir_ptr_long, op_adc, 2, 7 - m + dl),
            0x69 => op!(imm, op_adc, 3 - self.p.m as u16, 3 - m),
            0x6D => op!(abs, op_adc, 3, 5 - m),
            0x6F => op!(long, op_adc, 4, 6 - m),
            0x71 => op_px!(dir_ptr_y, dir_ptr, op_adc, 2, 6 - m + dl),
            0x72 => op!(dir_ptr, op_adc, 2, 6 - m + dl),
            0x73 => op!(stack_rel_ptr_y, op_adc, 2, 8 - m),
            0x75 => op!(dir_x, op_adc, 2, 5 - m + dl),
            0x77 => op!(dir_ptr_long_y, op_adc, 2, 7 - m + dl),
            0x79 => op_px!(abs_y, abs, op_adc, 3, 5 - m),
            0x7D => op_px!(abs_x, abs, op_adc, 3, 5 - m),
            0x7F => op!(long_x, op_adc, 4, 6 - m),
            // SBC
            0xE1 => op!(dir_x_ptr, op_sbc, 2, 7 - m + dl),
            0xE3 => op!(stack_rel, op_sbc, 2, 5 - m),
            0xE5 => op!(dir, op_sbc, 2, 4 - m + dl),
            0xE7 => op!(dir_ptr_long, op_sbc, 2, 7 - m + dl),
            0xE9 => op!(imm, op_sbc, 3 - self.p.m as u16, 3 - m),
            0xED => op!(abs, op_sbc, 3, 5 - m),
            0xEF => op!(long, op_sbc, 4, 6 - m),
            0xF1 => op_px!(dir_ptr_y, dir_ptr, op_sbc, 2, 6 - m + dl),
            0xF2 => op!(dir_ptr, op_sbc, 2, 6 - m + dl),
            0xF3 => op!(stack_rel_ptr_y, op_sbc, 2, 8 - m),
            0xF5 => op!(dir_x, op_sbc, 2, 5 - m + dl),
            0xF7 => op!(dir_ptr_long_y, op_sbc, 2, 7 - m + dl),
            0xF9 => op_px!(abs_y, abs, op_sbc, 3, 5 - m),
            0xFD => op_px!(abs_x, abs, op_sbc, 3, 5 - m),
            0xFF => op!(long_x, op_sbc, 4, 6 - m),
            // CMP
            0xC1 => op!(dir_x_ptr, op_cmp, 2, 7 - m + dl),
            0xC3 => op!(stack_rel, op_cmp, 2, 5 - m),
            0xC5 => op!(dir, op_cmp, 2, 4 - m + dl),
            0xC7 => op!(dir_ptr_long, op_cmp, 2, 7 - m + dl),
            0xC9 => op!(imm, op_cmp, 3 - self.p.m as u16, 3 - m),
            0xCD => op!(abs, op_cmp, 3, 5 - m),
            0xCF => op!(long, op_cmp, 4, 6 - m),
            0xD1 => op_px!(dir_ptr_y, dir_ptr, op_cmp, 2, 6 - m + dl),
            0xD2 => op!(dir_ptr, op_cmp, 2, 6 - m + dl),
            0xD3 => op!(stack_rel_ptr_y, op_cmp, 2, 8 - m),
            0xD5 => op!(dir_x, op_cmp, 2, 5 - m + dl),
            0xD7 => op!(dir_ptr_long_y, op_cmp, 2, 7 - m + dl),
            0xD9 => op_px!(abs_y, abs, op_cmp, 3, 5 - m),
            0xDD => op_px!(abs_x, abs, op_cmp, 3, 5 - m),
            0xDF => op!(long_x, op_cmp, 4, 6 - m),
            // CPX/CPY
            0xE0 => op!(imm, op_cpx, 3 - self.p.x as u16, 3 - x),
            0xE4 => op!(dir, op_cpx, 2, 4 - x + dl),
            0xEC => op!(abs, op_cpx, 3, 5 - x),
            0xC0 => op!(imm, op_cpy, 3 - self.p.x as u16, 3 - x),
            0xC4 => op!(dir, op_cpy, 2, 4 - x + dl),
            0xCC => op!(abs, op_cpy, 3, 5 - x),
            // INC/DEC
            0x3A => step_reg!(self.p.m, self.a, wrapping_sub),
            0xC6 => op!(dir, op_dec, 2, 7 - 2 * m + dl),
            0xCE => op!(abs, op_dec, 3, 8 - 2 * m),
            0xD6 => op!(dir_x, op_dec, 2, 8 - 2 * m + dl),
            0xDE => op!(abs_x, op_dec, 3, 9 - 2 * m),
            0xCA => step_reg!(self.p.x, self.x, wrapping_sub),
            0x88 => step_reg!(self.p.x, self.y, wrapping_sub),
            0x1A => step_reg!(self.p.m, self.a, wrapping_add),
            0xE6 => op!(dir, op_inc, 2, 7 - 2 * m + dl),
            0xEE => op!(abs, op_inc, 3, 8 - 2 * m),
            0xF6 => op!(dir_x, op_inc, 2, 8 - 2 * m + dl),
            0xFE => op!(abs_x, op_inc, 3, 9 - 2 * m),
            0xE8 => step_reg!(self.p.x, self.x, wrapping_add),
            0xC8 => step_reg!(self.p.x, self.y, wrapping_add),
            // AND
            0x21 => op!(dir_x_ptr, op_and, 2, 7 - m + dl),
            0x23 => op!(stack_rel, op_and, 2, 5 - m),
            0x25 => op!(dir, op_and, 2, 4 - m + dl),
            0x27 => op!(dir_ptr_long, op_and, 2, 7 - m + dl),
            0x29 => op!(imm, op_and, 3 - self.p.m as u16, 3 - m),
            0x2D => op!(abs, op_and, 3, 5 - m),
            0x2F => op!(long, op_and, 4, 6 - m),
            0x31 => op_px!(dir_ptr_y, dir_ptr, op_and, 2, 6 - m + dl),
            0x32 => op!(dir_ptr, op_and, 2, 6 - m + dl),
            0x33 => op!(stack_rel_ptr_y, op_and, 2, 8 - m),
            0x35 => op!(dir_x, op_and, 2, 5 - m + dl),
            0x37 => op!(dir_ptr_long_y, op_and, 2, 7 - m + dl),
            0x39 => op_px!(abs_y, abs, op_and, 3, 5 - m),
            0x3D => op_px!(abs_x, abs, op_and, 3, 5 - m),
            0x3F => op!(long_x, op_and, 4, 6 - m),
            // EOR
            0x41 => op!(dir_x_ptr, op_eor, 2, 7 - m + dl),
            0x43 => op!(stack_rel, op_eor, 2, 5 - m),
            0x45 => op!(dir, op_eor, 2, 4 - m + dl),
            0x47 => op!(dir_ptr_long, op_eor, 2, 7 - m + dl),
            0x49 => op!(imm, op_eor, 3 - self.p.m as u16, 3 - m),
            0x4D => op!(abs, op_eor, 3, 5 - m),
            0x4F => op!(long, op_eor, 4, 6 - m),
            0x51 => op_px!(dir_ptr_y, dir_ptr, op_eor, 2, 6 - m + dl),
            0x52 => op!(dir_ptr, op_eor, 2, 6 - m + dl),
            0x53 => op!(stack_rel_ptr_y, op_eor, 2, 8 - m),
            0x55 => op!(dir_x, op_eor, 2, 5 - m + dl),
            0x57 => op!(dir_ptr_long_y, op_eor, 2, 7 - m + dl),
            0x59 => op_px!(abs_y, abs, op_eor, 3, 5 - m),
            0x5D => op_px!(abs_x, abs, op_eor, 3, 5 - m),
            0x5F => op!(long_x, op_eor, 4, 6 - m),
            // ORA
            0x01 => op!(dir_x_ptr, op_ora, 2, 7 - m + dl),
            0x03 => op!(stack_rel, op_ora, 2, 5 - m),
            0x05 => op!(dir, op_ora, 2, 4 - m + dl),
            0x07 => op!(dir_ptr_long, op_ora, 2, 7 - m + dl),
            0x09 => op!(imm, op_ora, 3 - self.p.m as u16, 3 - m),
            0x0D => op!(abs, op_ora, 3, 5 - m),
            0x0F => op!(long, op_ora, 4, 6 - m),
            0x11 => op_px!(dir_ptr_y, dir_ptr, op_ora, 2, 6 - m + dl),
            0x12 => op!(dir_ptr, op_ora, 2, 6 - m + dl),
            0x13 => op!(stack_rel_ptr_y, op_ora, 2, 8 - m),
            0x15 => op!(dir_x, op_ora, 2, 5 - m + dl),
            0x17 => op!(dir_ptr_long_y, op_ora, 2, 7 - m + dl),
            0x19 => op_px!(abs_y, abs, op_ora, 3, 5 - m),
            0x1D => op_px!(abs_x, abs, op_ora, 3, 5 - m),
            0x1F => op!(long_x, op_ora, 4, 6 - m),
            // BIT / TRB / TSB
            0x24 => op!(dir, op_bit, 2, 4 - m + dl),
            0x2C => op!(abs, op_bit, 3, 5 - m),
            0x34 => op!(dir_x, op_bit, 2, 5 - m + dl),
            0x3C => op_px!(abs_x, abs, op_bit, 3, 5 - m),
            0x89 => op!(imm, op_bit_imm, 3 - self.p.m as u16, 3 - m),
            0x14 => op!(dir, op_trb, 2, 7 - 2 * m + dl),
            0x1C => op!(abs, op_trb, 3, 8 - 2 * m),
            0x04 => op!(dir, op_tsb, 2, 7 - 2 * m + dl),
            0x0C => op!(abs, op_tsb, 3, 8 - 2 * m),
            // Shifts and rotates
            0x06 => op!(dir, op_asl, 2, 7 - 2 * m + dl),
            0x0A => shift_a!(asl8, asl16),
            0x0E => op!(abs, op_asl, 3, 8 - 2 * m),
            0x16 => op!(dir_x, op_asl, 2, 8 - 2 * m + dl),
            0x1E => op!(abs_x, op_asl, 3, 9 - 2 * m),
            0x46 => op!(dir, op_lsr, 2, 7 - 2 * m + dl),
            0x4A => shift_a!(lsr8, lsr16),
            0x4E => op!(abs, op_lsr, 3, 8 - 2 * m),
            0x56 => op!(dir_x, op_lsr, 2, 8 - 2 * m + dl),
            0x5E => op!(abs_x, op_lsr, 3, 9 - 2 * m),
            0x26 => op!(dir, op_rol, 2, 7 - 2 * m + dl),
            0x2A => shift_a!(rol8, rol16),
            0x2E => op!(abs, op_rol, 3, 8 - 2 * m),
            0x36 => op!(dir_x, op_rol, 2, 8 - 2 * m + dl),
            0x3E => op!(abs_x, op_rol, 3, 9 - 2 * m),
            0x66 => op!(dir, op_ror, 2, 7 - 2 * m + dl),
            0x6A => shift_a!(ror8, ror16),
            0x6E => op!(abs, op_ror, 3, 8 - 2 * m),
            0x76 => op!(dir_x, op_ror, 2, 8 - 2 * m + dl),
            0x7E => op!(abs_x, op_ror, 3, 9 - 2 * m),
            // Branches
            0x90 => branch!(!self.p.c),
            0xB0 => branch!(self.p.c),
            0xF0 => branch!(self.p.z),
            0x30 => branch!(self.p.n),
            0xD0 => branch!(!self.p.z),
            0x10 => branch!(!self.p.n),
            0x50 => branch!(!self.p.v),
            0x70 => branch!(self.p.v),
            0x80 => {
                let old_pc = self.pc;
                self.pc = self.rel8(addr, bus).0 as u16;
                if self.e && (self.pc & 0xFF00 != old_pc & 0xFF00) {
                    4
                } else {
                    3
                }
            }
            0x82 => {
                self.pc = self.rel16(addr, bus).0 as u16;
                4
            }
            // Jumps and calls
            0x4C => {
                self.pc = bus.fetch_operand16(addr);
                3
            }
            0x5C => {
                let target = self.long(addr, bus).0;
                self.pb = (target >> 16) as u8;
                self.pc = target as u16;
                4
            }
            0x6C => {
                self.pc = self.abs_ptr(addr, bus).0 as u16;
                5
            }
            0x7C => {
                self.pc = self.abs_x_ptr(addr, bus).0 as u16;
                6
            }
            0xDC => {
                let target = self.abs_ptr_long(addr, bus).0;
                self.pb = (target >> 16) as u8;
                self.pc = target as u16;
                6
            }
            0x22 => {
                let target = self.long(addr, bus).0;
                let pb = self.pb;
                self.push8(pb, bus);
                let return_addr = self.pc.wrapping_add(3);
                self.push16(return_addr, bus);
                self.pb = (target >> 16) as u8;
                self.pc = target as u16;
                8
            }
            0x20 => {
                let target = bus.fetch_operand16(addr);
                let return_addr = self.pc.wrapping_add(2);
                self.push16(return_addr, bus);
                self.pc = target;
                6
            }
            0xFC => {
                let target = self.abs_x_ptr(addr, bus).0 as u16;
                let return_addr = self.pc.wrapping_add(2);
                self.push16(return_addr, bus);
                self.pc = target;
                8
            }
            0x6B => {
                self.pc = self.pull16(bus).wrapping_add(1);
                self.pb = self.pull8(bus);
                6
            }
            0x60 => {
                self.pc = self.pull16(bus).wrapping_add(1);
                6
            }
            // Software interrupts
            0x00 => {
                let return_addr = self.pc.wrapping_add(2);
                if self.e {
                    self.push16(return_addr, bus);
                    // The break bit tells BRK apart from a hardware IRQ
                    let p = self.p.value() | P_X;
                    self.push8(p, bus);
                    self.pc = bus.page_wrapping_read16(VEC_IRQ_BRK_EMU);
                } else {
                    let pb = self.pb;
                    self.push8(pb, bus);
                    self.push16(return_addr, bus);
                    let p = self.p.value();
                    self.push8(p, bus);
                    self.pc = bus.page_wrapping_read16(VEC_BRK);
                }
                self.pb = 0x00;
                self.p.i = true;
                self.p.d = false;
                8 - e
            }
            0x02 => {
                let return_addr = self.pc.wrapping_add(2);
                if !self.e {
                    let pb = self.pb;
                    self.push8(pb, bus);
                }
                self.push16(return_addr, bus);
                let p = self.p.value();
                self.push8(p, bus);
                self.pb = 0x00;
                self.pc = bus.page_wrapping_read16(if self.e { VEC_COP_EMU } else { VEC_COP });
                self.p.i = true;
                self.p.d = false;
                8 - e
            }
            0x40 => {
                let p = self.pull8(bus);
                self.p.set_value(p);
                if self.e {
                    self.p.m = true;
                    self.p.x = true;
                }
                if self.p.x {
                    self.x &= 0x00FF;
                    self.y &= 0x00FF;
                }
                self.pc = self.pull16(bus);
                if !self.e {
                    self.pb = self.pull8(bus);
                }
                7 - e
            }
            // Flag operations
            0x18 => flag!(c, false),
            0xD8 => flag!(d, false),
            0x58 => flag!(i, false),
            0xB8 => flag!(v, false),
            0x38 => flag!(c, true),
            0xF8 => flag!(d, true),
            0x78 => flag!(i, true),
            0xC2 => {
                let mask = bus.fetch_operand8(addr);
                self.p.clear_mask(mask);
                if self.e {
                    // Emulation keeps the widths pinned to 8 bits
                    self.p.m = true;
                    self.p.x = true;
                }
                self.pc = self.pc.wrapping_add(2);
                3
            }
            0xE2 => {
                let mask = bus.fetch_operand8(addr);
                self.p.set_mask(mask);
                if self.p.x {
                    self.x &= 0x00FF;
                    self.y &= 0x00FF;
                }
                self.pc = self.pc.wrapping_add(2);
                3
            }
            // Loads
            0xA1 => op!(dir_x_ptr, op_lda, 2, 7 - m + dl),
            0xA3 => op!(stack_rel, op_lda, 2, 5 - m),
            0xA5 => op!(dir, op_lda, 2, 4 - m + dl),
            0xA7 => op!(dir_ptr_long, op_lda, 2, 7 - m + dl),
            0xA9 => op!(imm, op_lda, 3 - self.p.m as u16, 3 - m),
            0xAD => op!(abs, op_lda, 3, 5 - m),
            0xAF => op!(long, op_lda, 4, 6 - m),
            0xB1 => op_px!(dir_ptr_y, dir_ptr, op_lda, 2, 6 - m + dl),
            0xB2 => op!(dir_ptr, op_lda, 2, 6 - m + dl),
            0xB3 => op!(stack_rel_ptr_y, op_lda, 2, 8 - m),
            0xB5 => op!(dir_x, op_lda, 2, 5 - m + dl),
            0xB7 => op!(dir_ptr_long_y, op_lda, 2, 7 - m + dl),
            0xB9 => op_px!(abs_y, abs, op_lda, 3, 5 - m),
            0xBD => op_px!(abs_x, abs, op_lda, 3, 5 - m),
            0xBF => op!(long_x, op_lda, 4, 6 - m),
            0xA2 => op!(imm, op_ldx, 3 - self.p.x as u16, 3 - x),
            0xA6 => op!(dir, op_ldx, 2, 4 - x + dl),
            0xAE => op!(abs, op_ldx, 3, 5 - x),
            0xB6 => op!(dir_y, op_ldx, 2, 5 - x + dl),
            0xBE => op_px!(abs_y, abs, op_ldx, 3, 5 - x),
            0xA0 => op!(imm, op_ldy, 3 - self.p.x as u16, 3 - x),
            0xA4 => op!(dir, op_ldy, 2, 4 - x + dl),
            0xAC => op!(abs, op_ldy, 3, 5 - x),
            0xB4 => op!(dir_x, op_ldy, 2, 5 - x + dl),
            0xBC => op_px!(abs_x, abs, op_ldy, 3, 5 - x),
            // Stores
            0x81 => op!(dir_x_ptr, op_sta, 2, 7 - m + dl),
            0x83 => op!(stack_rel, op_sta, 2, 5 - m),
            0x85 => op!(dir, op_sta, 2, 4 - m + dl),
            0x87 => op!(dir_ptr_long, op_sta, 2, 7 - m + dl),
            0x8D => op!(abs, op_sta, 3, 5 - m),
            0x8F => op!(long, op_sta, 4, 6 - m),
            0x91 => op!(dir_ptr_y, op_sta, 2, 7 - m + dl),
            0x92 => op!(dir_ptr, op_sta, 2, 6 - m + dl),
            0x93 => op!(stack_rel_ptr_y, op_sta, 2, 8 - m),
            0x95 => op!(dir_x, op_sta, 2, 5 - m + dl),
            0x97 => op!(dir_ptr_long_y, op_sta, 2, 7 - m + dl),
            0x99 => op!(abs_y, op_sta, 3, 6 - m),
            0x9D => op!(abs_x, op_sta, 3, 6 - m),
            0x9F => op!(long_x, op_sta, 4, 6 - m),
            0x86 => op!(dir, op_stx, 2, 4 - x + dl),
            0x8E => op!(abs, op_stx, 3, 5 - x),
            0x96 => op!(dir_y, op_stx, 2, 5 - x + dl),
            0x84 => op!(dir, op_sty, 2, 4 - x + dl),
            0x8C => op!(abs, op_sty, 3, 5 - x),
            0x94 => op!(dir_x, op_sty, 2, 5 - x + dl),
            0x64 => op!(dir, op_stz, 2, 4 - m + dl),
            0x74 => op!(dir_x, op_stz, 2, 5 - m + dl),
            0x9C => op!(abs, op_stz, 3, 5 - m),
            0x9E => op!(abs_x, op_stz, 3, 6 - m),
            // Block moves repeat until the count in A runs out
            0x54 => op!(src_dest, op_mvn, 0, 7),
            0x44 => op!(src_dest, op_mvp, 0, 7),
            // Misc
            0xEA => {
                self.pc = self.pc.wrapping_add(1);
                2
            }
            0x42 => {
                self.pc = self.pc.wrapping_add(2);
                2
            }
            // Stack effective-address pushes
            0xF4 => {
                let value = bus.fetch_operand16(addr);
                self.push16(value, bus);
                self.pc = self.pc.wrapping_add(3);
                5
            }
            0xD4 => {
                let pointer = self.dir(addr, bus).0;
                let value = bus.bank_wrapping_read16(pointer);
                self.push16(value, bus);
                self.pc = self.pc.wrapping_add(2);
                6 + dl
            }
            0x62 => {
                let offset = bus.fetch_operand16(addr);
                let value = self.pc.wrapping_add(3).wrapping_add(offset);
                self.push16(value, bus);
                self.pc = self.pc.wrapping_add(3);
                6
            }
            // Stack pushes and pulls
            0x48 => push_reg!(self.p.m, self.a, 4 - m),
            0xDA => push_reg!(self.p.x, self.x, 4 - x),
            0x5A => push_reg!(self.p.x, self.y, 4 - x),
            0x68 => pull_reg!(self.p.m, self.a, 5 - m),
            0xFA => pull_reg!(self.p.x, self.x, 5 - x),
            0x7A => pull_reg!(self.p.x, self.y, 5 - x),
            0x8B => push_reg!(true, self.db as u16, 3),
            0x0B => push_reg!(false, self.d, 4),
            0x4B => push_reg!(true, self.pb as u16, 3),
            0x08 => push_reg!(true, self.p.value() as u16, 3),
            0xAB => {
                let value = self.pull8(bus);
                self.db = value;
                self.p.n = value > 0x7F;
                self.p.z = value == 0;
                self.pc = self.pc.wrapping_add(1);
                4
            }
            0x2B => pull_reg!(false, self.d, 5),
            0x28 => {
                let value = self.pull8(bus);
                self.p.set_value(value);
                if self.e {
                    self.p.m = true;
                    self.p.x = true;
                }
                if self.p.x {
                    self.x &= 0x00FF;
                    self.y &= 0x00FF;
                }
                self.pc = self.pc.wrapping_add(1);
                4
            }
            // Halt states
            0xDB => {
                self.stopped = true;
                3
            }
            0xCB => {
                self.waiting = true;
                3
            }
            // Transfers
            0xAA => transfer!(self.p.x, self.a, self.x),
            0xA8 => transfer!(self.p.x, self.a, self.y),
            0xBA => transfer!(self.p.x, self.s, self.x),
            0x8A => transfer!(self.p.m, self.x, self.a),
            0x9A => {
                self.s = if self.e {
                    0x0100 | (self.x & 0x00FF)
                } else {
                    self.x
                };
                self.pc = self.pc.wrapping_add(1);
                2
            }
            0x9B => transfer!(self.p.x, self.x, self.y),
            0x98 => transfer!(self.p.m, self.y, self.a),
            0xBB => transfer!(self.p.x, self.y, self.x),
            0x5B => transfer!(false, self.a, self.d),
            0x1B => {
                self.s = if self.e {
                    0x0100 | (self.a & 0x00FF)
                } else {
                    self.a
                };
                self.pc = self.pc.wrapping_add(1);
                2
            }
            0x7B => transfer!(false, self.d, self.a),
            0x3B => transfer!(false, self.s, self.a),
            0xEB => {
                self.a = self.a.rotate_left(8);
                self.p.n = self.a as u8 > 0x7F;
                self.p.z = self.a as u8 == 0;
                self.pc = self.pc.wrapping_add(1);
                3
            }
            0xFB => {
                let carry_was = self.p.c;
                self.p.c = self.e;
                if carry_was {
                    self.enter_emulation();
                } else {
                    self.e = false;
                }
                self.pc = self.pc.wrapping_add(1);
                2
            }
        }
    }

    // Addressing modes. Every helper resolves the instruction's operand at
    // `addr` to the 24bit address of its data and the wrapping the data
    // obeys.

    /// `[$DB:HHLL]`; JMP and JSR use the program bank instead
    fn abs(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            join_bank(self.db, bus.fetch_operand16(addr)),
            Wrap::Space,
        )
    }

    fn abs_x(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            (join_bank(self.db, bus.fetch_operand16(addr)) + self.x as u32) & 0xFF_FFFF,
            Wrap::Space,
        )
    }

    fn abs_y(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            (join_bank(self.db, bus.fetch_operand16(addr)) + self.y as u32) & 0xFF_FFFF,
            Wrap::Space,
        )
    }

    /// 16bit pointer in bank zero, target in the program bank
    fn abs_ptr(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = bus.fetch_operand16(addr) as u32;
        (
            join_bank(self.pb, bus.bank_wrapping_read16(pointer)),
            Wrap::Bank,
        )
    }

    /// 24bit pointer in bank zero
    fn abs_ptr_long(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = bus.fetch_operand16(addr) as u32;
        (bus.bank_wrapping_read24(pointer), Wrap::Bank)
    }

    /// 16bit pointer at `X`-indexed operand in the program bank
    fn abs_x_ptr(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = join_bank(self.pb, bus.fetch_operand16(addr).wrapping_add(self.x));
        (
            join_bank(self.pb, bus.bank_wrapping_read16(pointer)),
            Wrap::Bank,
        )
    }

    /// Direct page plus offset, in bank zero
    fn dir(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            self.d.wrapping_add(bus.fetch_operand8(addr) as u16) as u32,
            Wrap::Bank,
        )
    }

    /// Direct page indexed; emulation mode with an aligned `D` wraps in page
    fn dir_x(&self, addr: u32, bus: &mut Bus) -> Ea {
        if self.e && self.d & 0xFF == 0 {
            (
                (self.d | bus.fetch_operand8(addr).wrapping_add(self.x as u8) as u16) as u32,
                Wrap::Page,
            )
        } else {
            (
                self.d
                    .wrapping_add(bus.fetch_operand8(addr) as u16)
                    .wrapping_add(self.x) as u32,
                Wrap::Bank,
            )
        }
    }

    fn dir_y(&self, addr: u32, bus: &mut Bus) -> Ea {
        if self.e && self.d & 0xFF == 0 {
            (
                (self.d | bus.fetch_operand8(addr).wrapping_add(self.y as u8) as u16) as u32,
                Wrap::Page,
            )
        } else {
            (
                self.d
                    .wrapping_add(bus.fetch_operand8(addr) as u16)
                    .wrapping_add(self.y) as u32,
                Wrap::Bank,
            )
        }
    }

    /// 16bit pointer in the direct page, data in the data bank
    fn dir_ptr(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = self.dir(addr, bus).0;
        if self.e && self.d & 0xFF == 0 {
            let low = bus.read8(pointer);
            let high = bus.read8(page_wrapping_add(pointer, 1));
            (
                join_bank(self.db, ((high as u16) << 8) | low as u16),
                Wrap::Space,
            )
        } else {
            (
                join_bank(self.db, bus.bank_wrapping_read16(pointer)),
                Wrap::Space,
            )
        }
    }

    /// 24bit pointer in the direct page
    fn dir_ptr_long(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = self.dir(addr, bus).0;
        (bus.bank_wrapping_read24(pointer), Wrap::Space)
    }

    /// Pointer fetched from the `X`-indexed direct page
    fn dir_x_ptr(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = self.dir_x(addr, bus).0;
        if self.e && self.d & 0xFF == 0 {
            let low = bus.read8(pointer);
            let high = bus.read8(page_wrapping_add(pointer, 1));
            (
                join_bank(self.db, ((high as u16) << 8) | low as u16),
                Wrap::Space,
            )
        } else {
            (
                join_bank(self.db, bus.bank_wrapping_read16(pointer)),
                Wrap::Space,
            )
        }
    }

    fn dir_ptr_y(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            (self.dir_ptr(addr, bus).0 + self.y as u32) & 0xFF_FFFF,
            Wrap::Space,
        )
    }

    fn dir_ptr_long_y(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            (self.dir_ptr_long(addr, bus).0 + self.y as u32) & 0xFF_FFFF,
            Wrap::Space,
        )
    }

    /// Operand bytes following the opcode
    fn imm(&self, _addr: u32, _bus: &mut Bus) -> Ea {
        (join_bank(self.pb, self.pc.wrapping_add(1)), Wrap::Bank)
    }

    fn long(&self, addr: u32, bus: &mut Bus) -> Ea {
        (bus.fetch_operand24(addr), Wrap::Space)
    }

    fn long_x(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            (bus.fetch_operand24(addr) + self.x as u32) & 0xFF_FFFF,
            Wrap::Space,
        )
    }

    /// Branch target of a signed 8bit offset
    fn rel8(&self, addr: u32, bus: &mut Bus) -> Ea {
        let offset = bus.fetch_operand8(addr) as i8;
        (
            join_bank(
                self.pb,
                self.pc.wrapping_add(2).wrapping_add(offset as u16),
            ),
            Wrap::Bank,
        )
    }

    fn rel16(&self, addr: u32, bus: &mut Bus) -> Ea {
        let offset = bus.fetch_operand16(addr);
        (
            join_bank(self.pb, self.pc.wrapping_add(3).wrapping_add(offset)),
            Wrap::Bank,
        )
    }

    /// Block move source `[$HH:X]` and destination `[$LL:Y]`
    fn src_dest(&self, addr: u32, bus: &mut Bus) -> (u32, u32) {
        let operand = bus.fetch_operand16(addr);
        (
            join_bank((operand >> 8) as u8, self.x),
            join_bank(operand as u8, self.y),
        )
    }

    /// Stack pointer plus offset, in bank zero
    fn stack_rel(&self, addr: u32, bus: &mut Bus) -> Ea {
        (
            self.s.wrapping_add(bus.fetch_operand8(addr) as u16) as u32,
            Wrap::Bank,
        )
    }

    fn stack_rel_ptr_y(&self, addr: u32, bus: &mut Bus) -> Ea {
        let pointer = self.s.wrapping_add(bus.fetch_operand8(addr) as u16) as u32;
        (
            (join_bank(self.db, bus.bank_wrapping_read16(pointer)) + self.y as u32) & 0xFF_FFFF,
            Wrap::Space,
        )
    }

    // Stack primitives. Emulation mode pins the pointer to page $01.

    fn push8(&mut self, value: u8, bus: &mut Bus) {
        bus.write8(self.s as u32, value);
        self.step_s(-1);
    }

    fn push16(&mut self, value: u16, bus: &mut Bus) {
        self.step_s(-1);
        if self.e {
            bus.page_wrapping_write16(self.s as u32, value);
        } else {
            bus.bank_wrapping_write16(self.s as u32, value);
        }
        self.step_s(-1);
    }

    fn pull8(&mut self, bus: &mut Bus) -> u8 {
        self.step_s(1);
        bus.read8(self.s as u32)
    }

    fn pull16(&mut self, bus: &mut Bus) -> u16 {
        self.step_s(1);
        let value = if self.e {
            bus.page_wrapping_read16(self.s as u32)
        } else {
            bus.bank_wrapping_read16(self.s as u32)
        };
        self.step_s(1);
        value
    }

    fn step_s(&mut self, delta: i16) {
        if self.e {
            self.s = 0x0100 | (self.s as u8).wrapping_add_signed(delta as i8) as u16;
        } else {
            self.s = self.s.wrapping_add_signed(delta);
        }
    }

    /// Flips into emulation mode: 8bit widths, stack pinned to page $01
    fn enter_emulation(&mut self) {
        self.e = true;
        self.p.m = true;
        self.p.x = true;
        self.x &= 0x00FF;
        self.y &= 0x00FF;
        self.s = 0x0100 | (self.s & 0x00FF);
    }

    // Data access honoring the addressing mode's wrap

    fn read16_wrapped(&self, bus: &mut Bus, ea: &Ea) -> u16 {
        match ea.1 {
            Wrap::Page => bus.page_wrapping_read16(ea.0),
            Wrap::Bank => bus.bank_wrapping_read16(ea.0),
            Wrap::Space => bus.addr_wrapping_read16(ea.0),
        }
    }

    fn write16_wrapped(&self, bus: &mut Bus, ea: &Ea, value: u16) {
        match ea.1 {
            Wrap::Page => bus.page_wrapping_write16(ea.0, value),
            Wrap::Bank => bus.bank_wrapping_write16(ea.0, value),
            Wrap::Space => bus.addr_wrapping_write16(ea.0, value),
        }
    }

    // Arithmetic cores

    /// Binary or BCD add/subtract with carry at 8 bits
    ///
    /// Subtraction runs as a complemented add so one carry chain serves both
    /// directions. Overflow always reflects the binary interpretation, the
    /// decimal path corrects digit by digit.
    fn add_sub8(&mut self, lhs: u8, rhs: u8, subtract: bool) -> u8 {
        let operand = if subtract { !rhs } else { rhs };
        let binary = lhs as u16 + operand as u16 + self.p.c as u16;
        let (result8, carry) = if self.p.d {
            let (result, carry) = if subtract {
                bcd_sub(lhs as u32, rhs as u32, self.p.c, 2)
            } else {
                bcd_add(lhs as u32, rhs as u32, self.p.c, 2)
            };
            (result as u8, carry)
        } else {
            (binary as u8, binary > 0xFF)
        };
        self.p.c = carry;
        self.p.v = !(lhs ^ operand) & (lhs ^ binary as u8) & 0x80 != 0;
        self.p.n = result8 > 0x7F;
        self.p.z = result8 == 0;
        result8
    }

    /// As [`add_sub8`] across four digit pairs
    ///
    /// [`add_sub8`]: Cpu::add_sub8
    fn add_sub16(&mut self, lhs: u16, rhs: u16, subtract: bool) -> u16 {
        let operand = if subtract { !rhs } else { rhs };
        let binary = lhs as u32 + operand as u32 + self.p.c as u32;
        let (result16, carry) = if self.p.d {
            let (result, carry) = if subtract {
                bcd_sub(lhs as u32, rhs as u32, self.p.c, 4)
            } else {
                bcd_add(lhs as u32, rhs as u32, self.p.c, 4)
            };
            (result as u16, carry)
        } else {
            (binary as u16, binary > 0xFFFF)
        };
        self.p.c = carry;
        self.p.v = !(lhs ^ operand) & (lhs ^ binary as u16) & 0x8000 != 0;
        self.p.n = result16 > 0x7FFF;
        self.p.z = result16 == 0;
        result16
    }

    fn compare8(&mut self, lhs: u8, rhs: u8) {
        let result = lhs as u16 + !rhs as u16 + 1;
        self.p.n = result as u8 > 0x7F;
        self.p.z = result as u8 == 0;
        self.p.c = result > 0xFF;
    }

    fn compare16(&mut self, lhs: u16, rhs: u16) {
        let result = lhs as u32 + !rhs as u32 + 1;
        self.p.n = result as u16 > 0x7FFF;
        self.p.z = result as u16 == 0;
        self.p.c = result > 0xFFFF;
    }

    fn asl8(&mut self, data: u8) -> u8 {
        self.p.c = data & 0x80 != 0;
        let result = data << 1;
        self.p.n = result > 0x7F;
        self.p.z = result == 0;
        result
    }

    fn asl16(&mut self, data: u16) -> u16 {
        self.p.c = data & 0x8000 != 0;
        let result = data << 1;
        self.p.n = result > 0x7FFF;
        self.p.z = result == 0;
        result
    }

    fn lsr8(&mut self, data: u8) -> u8 {
        self.p.c = data & 0x01 != 0;
        let result = data >> 1;
        self.p.n = false;
        self.p.z = result == 0;
        result
    }

    fn lsr16(&mut self, data: u16) -> u16 {
        self.p.c = data & 0x0001 != 0;
        let result = data >> 1;
        self.p.n = false;
        self.p.z = result == 0;
        result
    }

    fn rol8(&mut self, data: u8) -> u8 {
        let carry_out = data & 0x80 != 0;
        let result = (data << 1) | self.p.c as u8;
        self.p.c = carry_out;
        self.p.n = result > 0x7F;
        self.p.z = result == 0;
        result
    }

    fn rol16(&mut self, data: u16) -> u16 {
        let carry_out = data & 0x8000 != 0;
        let result = (data << 1) | self.p.c as u16;
        self.p.c = carry_out;
        self.p.n = result > 0x7FFF;
        self.p.z = result == 0;
        result
    }

    fn ror8(&mut self, data: u8) -> u8 {
        let carry_out = data & 0x01 != 0;
        let result = (data >> 1) | ((self.p.c as u8) << 7);
        self.p.c = carry_out;
        self.p.n = result > 0x7F;
        self.p.z = result == 0;
        result
    }

    fn ror16(&mut self, data: u16) -> u16 {
        let carry_out = data & 0x0001 != 0;
        let result = (data >> 1) | ((self.p.c as u16) << 15);
        self.p.c = carry_out;
        self.p.n = result > 0x7FFF;
        self.p.z = result == 0;
        result
    }

    // Memory-operand instruction bodies, width chosen by M or X

    fn op_adc(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            let result = self.add_sub8(self.a as u8, data, false);
            self.a = (self.a & 0xFF00) | result as u16;
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.a = self.add_sub16(self.a, data, false);
        }
    }

    fn op_sbc(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            let result = self.add_sub8(self.a as u8, data, true);
            self.a = (self.a & 0xFF00) | result as u16;
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.a = self.add_sub16(self.a, data, true);
        }
    }

    fn op_cmp(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            self.compare8(self.a as u8, data);
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.compare16(self.a, data);
        }
    }

    fn op_cpx(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.x {
            let data = bus.read8(ea.0);
            self.compare8(self.x as u8, data);
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.compare16(self.x, data);
        }
    }

    fn op_cpy(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.x {
            let data = bus.read8(ea.0);
            self.compare8(self.y as u8, data);
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.compare16(self.y, data);
        }
    }

    fn op_and(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.a as u8 & bus.read8(ea.0);
            self.a = (self.a & 0xFF00) | result as u16;
            self.p.n = result > 0x7F;
            self.p.z = result == 0;
        } else {
            self.a &= self.read16_wrapped(bus, ea);
            self.p.n = self.a > 0x7FFF;
            self.p.z = self.a == 0;
        }
    }

    fn op_eor(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.a as u8 ^ bus.read8(ea.0);
            self.a = (self.a & 0xFF00) | result as u16;
            self.p.n = result > 0x7F;
            self.p.z = result == 0;
        } else {
            self.a ^= self.read16_wrapped(bus, ea);
            self.p.n = self.a > 0x7FFF;
            self.p.z = self.a == 0;
        }
    }

    fn op_ora(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.a as u8 | bus.read8(ea.0);
            self.a = (self.a & 0xFF00) | result as u16;
            self.p.n = result > 0x7F;
            self.p.z = result == 0;
        } else {
            self.a |= self.read16_wrapped(bus, ea);
            self.p.n = self.a > 0x7FFF;
            self.p.z = self.a == 0;
        }
    }

    fn op_bit(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            self.p.n = data > 0x7F;
            self.p.v = data & 0x40 != 0;
            self.p.z = data & self.a as u8 == 0;
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.p.n = data > 0x7FFF;
            self.p.v = data & 0x4000 != 0;
            self.p.z = data & self.a == 0;
        }
    }

    /// Immediate BIT only touches the zero flag
    fn op_bit_imm(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            self.p.z = data & self.a as u8 == 0;
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.p.z = data & self.a == 0;
        }
    }

    fn op_trb(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            self.p.z = data & self.a as u8 == 0;
            bus.write8(ea.0, data & !(self.a as u8));
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.p.z = data & self.a == 0;
            self.write16_wrapped(bus, ea, data & !self.a);
        }
    }

    fn op_tsb(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            self.p.z = data & self.a as u8 == 0;
            bus.write8(ea.0, data | self.a as u8);
        } else {
            let data = self.read16_wrapped(bus, ea);
            self.p.z = data & self.a == 0;
            self.write16_wrapped(bus, ea, data | self.a);
        }
    }

    fn op_asl(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.asl8(bus.read8(ea.0));
            bus.write8(ea.0, result);
        } else {
            let data = self.read16_wrapped(bus, ea);
            let result = self.asl16(data);
            self.write16_wrapped(bus, ea, result);
        }
    }

    fn op_lsr(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.lsr8(bus.read8(ea.0));
            bus.write8(ea.0, result);
        } else {
            let data = self.read16_wrapped(bus, ea);
            let result = self.lsr16(data);
            self.write16_wrapped(bus, ea, result);
        }
    }

    fn op_rol(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.rol8(bus.read8(ea.0));
            bus.write8(ea.0, result);
        } else {
            let data = self.read16_wrapped(bus, ea);
            let result = self.rol16(data);
            self.write16_wrapped(bus, ea, result);
        }
    }

    fn op_ror(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let result = self.ror8(bus.read8(ea.0));
            bus.write8(ea.0, result);
        } else {
            let data = self.read16_wrapped(bus, ea);
            let result = self.ror16(data);
            self.write16_wrapped(bus, ea, result);
        }
    }

    fn op_inc(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0).wrapping_add(1);
            self.p.n = data > 0x7F;
            self.p.z = data == 0;
            bus.write8(ea.0, data);
        } else {
            let data = self.read16_wrapped(bus, ea).wrapping_add(1);
            self.p.n = data > 0x7FFF;
            self.p.z = data == 0;
            self.write16_wrapped(bus, ea, data);
        }
    }

    fn op_dec(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0).wrapping_sub(1);
            self.p.n = data > 0x7F;
            self.p.z = data == 0;
            bus.write8(ea.0, data);
        } else {
            let data = self.read16_wrapped(bus, ea).wrapping_sub(1);
            self.p.n = data > 0x7FFF;
            self.p.z = data == 0;
            self.write16_wrapped(bus, ea, data);
        }
    }

    fn op_lda(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            let data = bus.read8(ea.0);
            self.a = (self.a & 0xFF00) | data as u16;
            self.p.n = data > 0x7F;
            self.p.z = data == 0;
        } else {
            self.a = self.read16_wrapped(bus, ea);
            self.p.n = self.a > 0x7FFF;
            self.p.z = self.a == 0;
        }
    }

    fn op_ldx(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.x {
            let data = bus.read8(ea.0);
            self.x = data as u16;
            self.p.n = data > 0x7F;
            self.p.z = data == 0;
        } else {
            self.x = self.read16_wrapped(bus, ea);
            self.p.n = self.x > 0x7FFF;
            self.p.z = self.x == 0;
        }
    }

    fn op_ldy(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.x {
            let data = bus.read8(ea.0);
            self.y = data as u16;
            self.p.n = data > 0x7F;
            self.p.z = data == 0;
        } else {
            self.y = self.read16_wrapped(bus, ea);
            self.p.n = self.y > 0x7FFF;
            self.p.z = self.y == 0;
        }
    }

    fn op_sta(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            bus.write8(ea.0, self.a as u8);
        } else {
            self.write16_wrapped(bus, ea, self.a);
        }
    }

    fn op_stx(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.x {
            bus.write8(ea.0, self.x as u8);
        } else {
            self.write16_wrapped(bus, ea, self.x);
        }
    }

    fn op_sty(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.x {
            bus.write8(ea.0, self.y as u8);
        } else {
            self.write16_wrapped(bus, ea, self.y);
        }
    }

    fn op_stz(&mut self, ea: &Ea, bus: &mut Bus) {
        if self.p.m {
            bus.write8(ea.0, 0);
        } else {
            self.write16_wrapped(bus, ea, 0);
        }
    }

    /// One step of the ascending block move
    ///
    /// Copies a byte, steps the counters up and leaves `PC` in place until
    /// `A` wraps to `$FFFF`, so the instruction re-executes per byte. `DB`
    /// picks up the destination bank.
    fn op_mvn(&mut self, addrs: &(u32, u32), bus: &mut Bus) {
        let data = bus.read8(addrs.0);
        bus.write8(addrs.1, data);
        self.a = self.a.wrapping_sub(1);
        self.x = self.index_step(self.x, 1);
        self.y = self.index_step(self.y, 1);
        self.db = (addrs.1 >> 16) as u8;
        if self.a == 0xFFFF {
            self.pc = self.pc.wrapping_add(3);
        }
    }

    /// One step of the descending block move
    fn op_mvp(&mut self, addrs: &(u32, u32), bus: &mut Bus) {
        let data = bus.read8(addrs.0);
        bus.write8(addrs.1, data);
        self.a = self.a.wrapping_sub(1);
        self.x = self.index_step(self.x, -1);
        self.y = self.index_step(self.y, -1);
        self.db = (addrs.1 >> 16) as u8;
        if self.a == 0xFFFF {
            self.pc = self.pc.wrapping_add(3);
        }
    }

    fn index_step(&self, value: u16, delta: i16) -> u16 {
        if self.p.x {
            (value as u8).wrapping_add_signed(delta as i8) as u16
        } else {
            value.wrapping_add_signed(delta)
        }
    }
}

#[inline(always)]
fn join_bank(bank: u8, offset: u16) -> u32 {
    ((bank as u32) << 16) | offset as u32
}

/// Digit-wise decimal add with carry across `digits` nibbles
fn bcd_add(lhs: u32, rhs: u32, carry_in: bool, digits: u32) -> (u32, bool) {
    let mut carry = carry_in as u32;
    let mut result = 0;
    for index in 0..digits {
        let shift = index * 4;
        let mut digit = ((lhs >> shift) & 0xF) + ((rhs >> shift) & 0xF) + carry;
        carry = 0;
        if digit > 9 {
            digit += 6;
            carry = 1;
        }
        result |= (digit & 0xF) << shift;
    }
    (result, carry != 0)
}

/// Digit-wise decimal subtract; the returned carry is set when no borrow
/// was needed
fn bcd_sub(lhs: u32, rhs: u32, carry_in: bool, digits: u32) -> (u32, bool) {
    let mut borrow = !carry_in as i32;
    let mut result = 0;
    for index in 0..digits {
        let shift = index * 4;
        let mut digit = ((lhs >> shift) & 0xF) as i32 - ((rhs >> shift) & 0xF) as i32 - borrow;
        borrow = 0;
        if digit < 0 {
            digit += 10;
            borrow = 1;
        }
        result |= ((digit as u32) & 0xF) << shift;
    }
    (result, borrow == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Loads `program` into wram and points the CPU at it
    fn with_program(program: &[u8]) -> (Bus, Cpu) {
        let mut bus = Bus::new_no_cartridge();
        let mut cpu = Cpu::new(&mut bus);
        for (i, &byte) in program.iter().enumerate() {
            bus.write8(0x7E0000 + i as u32, byte);
        }
        cpu.pb = 0x7E;
        cpu.pc = 0x0000;
        (bus, cpu)
    }

    #[test]
    fn reset_state() {
        let mut bus = Bus::new(Some(crate::Cartridge::new(
            crate::cartridge::tests::lorom_image(),
        )
        .unwrap()));
        let cpu = Cpu::new(&mut bus);
        assert_eq!(0x8000, cpu.pc);
        assert_eq!(0x00, cpu.pb);
        assert_eq!(0x00, cpu.db);
        assert_eq!(0x01FF, cpu.s);
        assert!(cpu.e);
        assert!(cpu.p.m && cpu.p.x && cpu.p.i);
    }

    #[test]
    fn reset_vector_defaults_when_zero() {
        let mut bus = Bus::new_no_cartridge();
        let cpu = Cpu::new(&mut bus);
        assert_eq!(0x8000, cpu.pc);
    }

    #[test]
    fn lda_imm_widths() {
        // LDA #$42 / REP #$20 / LDA #$1234
        let (mut bus, mut cpu) = with_program(&[0xA9, 0x42, 0xC2, 0x20, 0xA9, 0x34, 0x12]);
        cpu.e = false;
        cpu.step(&mut bus);
        assert_eq!(0x42, cpu.a);
        cpu.step(&mut bus);
        assert!(!cpu.p.m);
        cpu.step(&mut bus);
        assert_eq!(0x1234, cpu.a);
        assert_eq!(0x0007, cpu.pc);
    }

    #[test]
    fn emulation_mode_keeps_high_bytes_zero() {
        // REP #$30 is overridden by emulation mode; INX/INY stay 8bit
        let (mut bus, mut cpu) = with_program(&[0xC2, 0x30, 0xE8, 0xC8, 0xA9, 0xFF]);
        assert!(cpu.e);
        cpu.x = 0x00FF;
        cpu.y = 0x00FF;
        cpu.step(&mut bus);
        assert!(cpu.p.m && cpu.p.x);
        cpu.step(&mut bus);
        cpu.step(&mut bus);
        assert_eq!(0x0000, cpu.x);
        assert_eq!(0x0000, cpu.y);
        cpu.step(&mut bus);
        assert_eq!(0x00FF, cpu.a & 0x00FF);
        assert_eq!(0x0000, cpu.a & 0xFF00);
    }

    #[test]
    fn sep_rep_flag_bytes() {
        let (mut bus, mut cpu) = with_program(&[0xE2, 0xFF, 0xC2, 0xC9]);
        cpu.e = false;
        cpu.step(&mut bus);
        assert_eq!(0xFF, cpu.p.value());
        cpu.step(&mut bus);
        assert_eq!(0x36, cpu.p.value());
    }

    #[test]
    fn sep_clamps_indices() {
        let (mut bus, mut cpu) = with_program(&[0xE2, 0x10]);
        cpu.e = false;
        cpu.p.x = false;
        cpu.x = 0x1234;
        cpu.y = 0xABCD;
        cpu.step(&mut bus);
        assert_eq!(0x0034, cpu.x);
        assert_eq!(0x00CD, cpu.y);
    }

    #[test]
    fn adc_binary_and_flags() {
        let (mut bus, mut cpu) = with_program(&[0x69, 0x7F]);
        cpu.a = 0x01;
        cpu.step(&mut bus);
        assert_eq!(0x80, cpu.a);
        assert!(cpu.p.v);
        assert!(cpu.p.n);
        assert!(!cpu.p.c);
    }

    #[test]
    fn adc_bcd() {
        let (mut bus, mut cpu) = with_program(&[0x69, 0x27]);
        cpu.p.d = true;
        cpu.a = 0x15;
        cpu.step(&mut bus);
        assert_eq!(0x42, cpu.a);
        assert!(!cpu.p.c);
    }

    #[test]
    fn adc_bcd_carries() {
        let (mut bus, mut cpu) = with_program(&[0x69, 0x01]);
        cpu.p.d = true;
        cpu.a = 0x99;
        cpu.step(&mut bus);
        assert_eq!(0x00, cpu.a);
        assert!(cpu.p.c);
        assert!(cpu.p.z);
    }

    #[test]
    fn sbc_bcd_16bit() {
        let (mut bus, mut cpu) = with_program(&[0xE9, 0x34, 0x12]);
        cpu.e = false;
        cpu.p.m = false;
        cpu.p.d = true;
        cpu.p.c = true;
        cpu.a = 0x4321;
        cpu.step(&mut bus);
        assert_eq!(0x3087, cpu.a);
        assert!(cpu.p.c);
    }

    #[test]
    fn cmp_sets_carry_unsigned() {
        let (mut bus, mut cpu) = with_program(&[0xC9, 0x40]);
        cpu.a = 0x40;
        cpu.step(&mut bus);
        assert!(cpu.p.c);
        assert!(cpu.p.z);
    }

    #[test]
    fn emulation_stack_stays_in_page_one() {
        let mut bus = Bus::new_no_cartridge();
        let mut cpu = Cpu::new(&mut bus);
        cpu.s = 0x0100;
        cpu.push8(0x12, &mut bus);
        assert_eq!(0x01FF, cpu.s);
        cpu.push16(0x3456, &mut bus);
        assert!((0x0100..=0x01FF).contains(&cpu.s));
        assert_eq!(0x3456, cpu.pull16(&mut bus));
        assert_eq!(0x12, cpu.pull8(&mut bus));
        assert_eq!(0x0100, cpu.s);
    }

    #[test]
    fn native_stack_wraps_bank() {
        let mut bus = Bus::new_no_cartridge();
        let mut cpu = Cpu::new(&mut bus);
        cpu.e = false;
        cpu.s = 0x0000;
        cpu.push16(0x1234, &mut bus);
        assert_eq!(0xFFFE, cpu.s);
        assert_eq!(0x1234, cpu.pull16(&mut bus));
    }

    #[test]
    fn xce_swaps_carry_and_emulation() {
        let (mut bus, mut cpu) = with_program(&[0xFB, 0xFB]);
        cpu.e = false;
        cpu.p.m = false;
        cpu.p.x = false;
        cpu.s = 0x1FFF;
        cpu.p.c = true;
        cpu.step(&mut bus);
        assert!(cpu.e);
        assert!(!cpu.p.c);
        // Transition forced the widths and the stack page
        assert!(cpu.p.m && cpu.p.x);
        assert_eq!(0x01FF, cpu.s);
        cpu.step(&mut bus);
        assert!(!cpu.e);
        assert!(cpu.p.c);
    }

    #[test]
    fn branch_taken_and_skipped() {
        // BEQ +2 (skipped) / BNE +1 (taken over a NOP)
        let (mut bus, mut cpu) = with_program(&[0xF0, 0x02, 0xD0, 0x01, 0xEA, 0xEA]);
        cpu.p.z = false;
        assert_eq!(2, cpu.step(&mut bus));
        assert_eq!(0x0002, cpu.pc);
        assert_eq!(3, cpu.step(&mut bus));
        assert_eq!(0x0005, cpu.pc);
    }

    #[test]
    fn mvn_copies_and_updates_db() {
        // MVN $7E,$7E: src bank in the high operand byte
        let (mut bus, mut cpu) = with_program(&[0x54, 0x7E, 0x7E]);
        cpu.e = false;
        cpu.p.x = false;
        cpu.a = 0x0002;
        cpu.x = 0x1000;
        cpu.y = 0x2000;
        for i in 0..3 {
            bus.write8(0x7E1000 + i, 0xA0 + i as u8);
        }
        // Three byte copies, each a re-execution of the opcode
        for _ in 0..3 {
            assert_eq!(7, cpu.step(&mut bus));
        }
        assert_eq!(0xFFFF, cpu.a);
        assert_eq!(0x1003, cpu.x);
        assert_eq!(0x2003, cpu.y);
        assert_eq!(0x7E, cpu.db);
        assert_eq!(0x0003, cpu.pc);
        for i in 0..3 {
            assert_eq!(0xA0 + i as u8, bus.read8(0x7E2000 + i));
        }
    }

    #[test]
    fn jsr_rts_roundtrip() {
        // JSR $0010 ... $0010: RTS
        let (mut bus, mut cpu) = with_program(&[0x20, 0x10, 0x00]);
        bus.write8(0x7E0010, 0x60);
        cpu.s = 0x01FF;
        cpu.step(&mut bus);
        assert_eq!(0x0010, cpu.pc);
        cpu.step(&mut bus);
        assert_eq!(0x0003, cpu.pc);
        assert_eq!(0x01FF, cpu.s);
    }

    #[test]
    fn nmi_vectors_and_resumes_wai() {
        let mut image = crate::cartridge::tests::lorom_image();
        // Emulation NMI vector at $00:FFFA, in the lorom upper half
        image[0x7FFA] = 0x00;
        image[0x7FFB] = 0x90;
        let mut bus = Bus::new(Some(crate::Cartridge::new(image).unwrap()));
        let mut cpu = Cpu::new(&mut bus);
        // WAI at $7E:0000
        bus.write8(0x7E0000, 0xCB);
        cpu.pb = 0x7E;
        cpu.pc = 0x0000;
        cpu.step(&mut bus);
        assert!(cpu.waiting());
        cpu.nmi(&mut bus);
        assert!(!cpu.waiting());
        assert_eq!(0x9000, cpu.pc);
        assert_eq!(0x00, cpu.pb);
        assert!(cpu.p.i);
    }

    #[test]
    fn irq_respects_interrupt_disable() {
        let mut image = crate::cartridge::tests::lorom_image();
        image[0x7FFE] = 0x00;
        image[0x7FFF] = 0xA0;
        let mut bus = Bus::new(Some(crate::Cartridge::new(image).unwrap()));
        let mut cpu = Cpu::new(&mut bus);
        cpu.p.i = true;
        assert!(!cpu.irq(&mut bus));
        cpu.p.i = false;
        assert!(cpu.irq(&mut bus));
        assert_eq!(0xA000, cpu.pc);
    }

    #[test]
    fn stp_halts_until_reset() {
        let (mut bus, mut cpu) = with_program(&[0xDB, 0xEA]);
        cpu.step(&mut bus);
        assert!(cpu.stopped());
        let pc = cpu.pc;
        cpu.step(&mut bus);
        assert_eq!(pc, cpu.pc);
        cpu.reset(&mut bus);
        assert!(!cpu.stopped());
    }

    #[test]
    fn absolute_indexed_page_cross_penalty() {
        // LDA $00FF,X with X=1 crosses into the next page
        let (mut bus, mut cpu) = with_program(&[0xBD, 0xFF, 0x00]);
        cpu.db = 0x7E;
        cpu.x = 0x0001;
        let crossed = cpu.step(&mut bus);
        cpu.pc = 0x0000;
        cpu.x = 0x0000;
        let straight = cpu.step(&mut bus);
        assert_eq!(1, crossed - straight);
    }

    #[test]
    fn bcd_helpers() {
        assert_eq!((0x42, false), bcd_add(0x15, 0x27, false, 2));
        assert_eq!((0x00, true), bcd_add(0x99, 0x00, true, 2));
        assert_eq!((0x27, true), bcd_sub(0x42, 0x15, true, 2));
        assert_eq!((0x99, false), bcd_sub(0x00, 0x01, true, 2));
        assert_eq!((0x3087, true), bcd_sub(0x4321, 0x1234, true, 4));
    }
}

impl Cpu {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.put_u16(self.a);
        w.put_u16(self.x);
        w.put_u16(self.y);
        w.put_u16(self.pc);
        w.put_u16(self.s);
        w.put_u16(self.d);
        w.put_u8(self.pb);
        w.put_u8(self.db);
        w.put_u8(self.p.value());
        w.put_bool(self.e);
        w.put_bool(self.stopped);
        w.put_bool(self.waiting);
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        self.a = r.take_u16();
        self.x = r.take_u16();
        self.y = r.take_u16();
        self.pc = r.take_u16();
        self.s = r.take_u16();
        self.d = r.take_u16();
        self.pb = r.take_u8();
        self.db = r.take_u8();
        self.p.set_value(r.take_u8());
        self.e = r.take_bool();
        self.stopped = r.take_bool();
        self.waiting = r.take_bool();
    }
}
