use super::mailbox::Mailbox;
use super::ApuMem;

/// Sound-CPU status flags
#[derive(Clone)]
pub struct Psw {
    pub n: bool,
    pub v: bool,
    /// Direct page select, moves the zero page to `$0100`
    pub p: bool,
    pub b: bool,
    /// Half carry out of the low nibble
    pub h: bool,
    /// No external interrupt sources exist, kept for PSW round trips
    pub i: bool,
    pub z: bool,
    pub c: bool,
}

impl Psw {
    fn new() -> Psw {
        Psw {
            n: false,
            v: false,
            p: false,
            b: false,
            h: false,
            i: false,
            z: true,
            c: false,
        }
    }

    pub fn value(&self) -> u8 {
        (self.c as u8)
            | (self.z as u8) << 1
            | (self.i as u8) << 2
            | (self.h as u8) << 3
            | (self.b as u8) << 4
            | (self.p as u8) << 5
            | (self.v as u8) << 6
            | (self.n as u8) << 7
    }

    pub fn set_value(&mut self, value: u8) {
        self.c = value & 0x01 != 0;
        self.z = value & 0x02 != 0;
        self.i = value & 0x04 != 0;
        self.h = value & 0x08 != 0;
        self.b = value & 0x10 != 0;
        self.p = value & 0x20 != 0;
        self.v = value & 0x40 != 0;
        self.n = value & 0x80 != 0;
    }
}

/// The 8bit core of the audio subsystem
///
/// Boots from the 64 byte IPL ROM aliased over `$FFC0` and talks to the
/// outside world only through the mailbox ports at `$F4-$F7`.
pub struct Spc700 {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub psw: Psw,
    sleeping: bool,
    stopped: bool,
}

impl Spc700 {
    pub fn new() -> Spc700 {
        Spc700 {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xEF,
            // IPL ROM entry
            pc: 0xFFC0,
            psw: Psw::new(),
            sleeping: false,
            stopped: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Spc700::new();
    }

    pub fn halted(&self) -> bool {
        self.sleeping || self.stopped
    }

    fn dp_base(&self) -> u16 {
        (self.psw.p as u16) << 8
    }

    fn dp(&self, offset: u8) -> u16 {
        self.dp_base() | offset as u16
    }

    /// Executes one instruction, returns the core cycles it took
    pub fn step(&mut self, mem: &mut ApuMem, mailbox: &mut Mailbox) -> u32 {
        if self.halted() {
            return 2;
        }

        let opcode = mem.read8(self.pc, mailbox);
        self.pc = self.pc.wrapping_add(1);

        macro_rules! fetch8 {
            () => {{
                let value = mem.read8(self.pc, mailbox);
                self.pc = self.pc.wrapping_add(1);
                value
            }};
        }
        macro_rules! fetch16 {
            () => {{
                let low = fetch8!() as u16;
                let high = fetch8!() as u16;
                (high << 8) | low
            }};
        }
        macro_rules! rd {
            ($addr:expr) => {{
                let addr = $addr;
                mem.read8(addr, mailbox)
            }};
        }
        macro_rules! wr {
            ($addr:expr, $value:expr) => {{
                let addr = $addr;
                let value = $value;
                mem.write8(addr, value, mailbox)
            }};
        }
        // Word access in the direct page wraps the offset, not the page
        macro_rules! rd_dp16 {
            ($offset:expr) => {{
                let offset = $offset;
                rd!(self.dp(offset)) as u16
                    | ((rd!(self.dp(offset.wrapping_add(1))) as u16) << 8)
            }};
        }

        // Effective addresses
        macro_rules! ea_dp {
            () => {{
                let offset = fetch8!();
                self.dp(offset)
            }};
        }
        macro_rules! ea_dp_x {
            () => {{
                let offset = fetch8!();
                self.dp(offset.wrapping_add(self.x))
            }};
        }
        macro_rules! ea_dp_y {
            () => {{
                let offset = fetch8!();
                self.dp(offset.wrapping_add(self.y))
            }};
        }
        macro_rules! ea_abs {
            () => {
                fetch16!()
            };
        }
        macro_rules! ea_abs_x {
            () => {
                fetch16!().wrapping_add(self.x as u16)
            };
        }
        macro_rules! ea_abs_y {
            () => {
                fetch16!().wrapping_add(self.y as u16)
            };
        }
        // [dp+X]: pointer in the indexed direct page
        macro_rules! ea_dp_x_ind {
            () => {{
                let offset = fetch8!().wrapping_add(self.x);
                rd!(self.dp(offset)) as u16
                    | ((rd!(self.dp(offset.wrapping_add(1))) as u16) << 8)
            }};
        }
        // [dp]+Y: pointer in the direct page, then indexed
        macro_rules! ea_dp_ind_y {
            () => {{
                let offset = fetch8!();
                let pointer = rd!(self.dp(offset)) as u16
                    | ((rd!(self.dp(offset.wrapping_add(1))) as u16) << 8);
                pointer.wrapping_add(self.y as u16)
            }};
        }

        // acc-op-memory and memory-op-memory forms
        macro_rules! alu_a {
            ($op:ident, $addr:expr, $cycles:expr) => {{
                let data = rd!($addr);
                self.a = self.$op(self.a, data);
                $cycles
            }};
        }
        macro_rules! alu_mem {
            ($op:ident, $cycles:expr) => {{
                // dest, src operand order: second fetch is the destination
                let src = ea_dp!();
                let dest = ea_dp!();
                let rhs = rd!(src);
                let lhs = rd!(dest);
                let result = self.$op(lhs, rhs);
                wr!(dest, result);
                $cycles
            }};
        }
        macro_rules! alu_mem_imm {
            ($op:ident, $cycles:expr) => {{
                let rhs = fetch8!();
                let dest = ea_dp!();
                let lhs = rd!(dest);
                let result = self.$op(lhs, rhs);
                wr!(dest, result);
                $cycles
            }};
        }
        macro_rules! alu_ind {
            ($op:ident, $cycles:expr) => {{
                let lhs = rd!(self.dp(self.x));
                let rhs = rd!(self.dp(self.y));
                let result = self.$op(lhs, rhs);
                wr!(self.dp(self.x), result);
                $cycles
            }};
        }
        // CMP writes nothing back
        macro_rules! cmp_mem {
            ($cycles:expr) => {{
                let src = ea_dp!();
                let dest = ea_dp!();
                let rhs = rd!(src);
                let lhs = rd!(dest);
                self.op_cmp(lhs, rhs);
                $cycles
            }};
        }
        macro_rules! rmw {
            ($op:ident, $addr:expr, $cycles:expr) => {{
                let addr = $addr;
                let data = rd!(addr);
                let result = self.$op(data);
                wr!(addr, result);
                $cycles
            }};
        }
        macro_rules! branch {
            ($cond:expr) => {{
                let offset = fetch8!() as i8;
                if $cond {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    4
                } else {
                    2
                }
            }};
        }
        macro_rules! bit_branch {
            ($bit:expr, $set:expr) => {{
                let addr = ea_dp!();
                let offset = fetch8!() as i8;
                let data = rd!(addr);
                if (data & (1 << $bit) != 0) == $set {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    7
                } else {
                    5
                }
            }};
        }
        macro_rules! set_clr1 {
            ($bit:expr, $set:expr) => {{
                let addr = ea_dp!();
                let data = rd!(addr);
                let result = if $set {
                    data | (1 << $bit)
                } else {
                    data & !(1 << $bit)
                };
                wr!(addr, result);
                4
            }};
        }
        // Absolute-bit operand: 13bit address plus bit index
        macro_rules! abs_bit {
            () => {{
                let operand = fetch16!();
                (operand & 0x1FFF, (operand >> 13) as u8)
            }};
        }
        macro_rules! mov_to {
            ($addr:expr, $value:expr, $cycles:expr) => {{
                let addr = $addr;
                wr!(addr, $value);
                $cycles
            }};
        }
        macro_rules! mov_reg {
            ($reg:ident, $value:expr, $cycles:expr) => {{
                self.$reg = $value;
                self.set_nz(self.$reg);
                $cycles
            }};
        }

        match opcode {
            0x00 => 2, // NOP
            // Status bit instructions
            0x20 => { self.psw.p = false; 2 }
            0x40 => { self.psw.p = true; 2 }
            0x60 => { self.psw.c = false; 2 }
            0x80 => { self.psw.c = true; 2 }
            0xA0 => { self.psw.i = true; 3 }
            0xC0 => { self.psw.i = false; 3 }
            0xE0 => { self.psw.v = false; self.psw.h = false; 2 }
            0xED => { self.psw.c = !self.psw.c; 3 }
            // Branches
            0x10 => branch!(!self.psw.n),
            0x30 => branch!(self.psw.n),
            0x50 => branch!(!self.psw.v),
            0x70 => branch!(self.psw.v),
            0x90 => branch!(!self.psw.c),
            0xB0 => branch!(self.psw.c),
            0xD0 => branch!(!self.psw.z),
            0xF0 => branch!(self.psw.z),
            0x2F => {
                let offset = fetch8!() as i8;
                self.pc = self.pc.wrapping_add(offset as u16);
                4
            }
            // TCALL through the vector table at $FFDE downward
            0x01 | 0x11 | 0x21 | 0x31 | 0x41 | 0x51 | 0x61 | 0x71 | 0x81 | 0x91 | 0xA1 | 0xB1
            | 0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let n = (opcode >> 4) as u16;
                let pc = self.pc;
                self.push16(pc, mem, mailbox);
                let vector = 0xFFDE - 2 * n;
                self.pc = rd!(vector) as u16 | ((rd!(vector.wrapping_add(1)) as u16) << 8);
                8
            }
            // SET1/CLR1 on direct page bits
            0x02 => set_clr1!(0, true),
            0x12 => set_clr1!(0, false),
            0x22 => set_clr1!(1, true),
            0x32 => set_clr1!(1, false),
            0x42 => set_clr1!(2, true),
            0x52 => set_clr1!(2, false),
            0x62 => set_clr1!(3, true),
            0x72 => set_clr1!(3, false),
            0x82 => set_clr1!(4, true),
            0x92 => set_clr1!(4, false),
            0xA2 => set_clr1!(5, true),
            0xB2 => set_clr1!(5, false),
            0xC2 => set_clr1!(6, true),
            0xD2 => set_clr1!(6, false),
            0xE2 => set_clr1!(7, true),
            0xF2 => set_clr1!(7, false),
            // BBS/BBC
            0x03 => bit_branch!(0, true),
            0x13 => bit_branch!(0, false),
            0x23 => bit_branch!(1, true),
            0x33 => bit_branch!(1, false),
            0x43 => bit_branch!(2, true),
            0x53 => bit_branch!(2, false),
            0x63 => bit_branch!(3, true),
            0x73 => bit_branch!(3, false),
            0x83 => bit_branch!(4, true),
            0x93 => bit_branch!(4, false),
            0xA3 => bit_branch!(5, true),
            0xB3 => bit_branch!(5, false),
            0xC3 => bit_branch!(6, true),
            0xD3 => bit_branch!(6, false),
            0xE3 => bit_branch!(7, true),
            0xF3 => bit_branch!(7, false),
            // OR
            0x04 => alu_a!(op_or, ea_dp!(), 3),
            0x14 => alu_a!(op_or, ea_dp_x!(), 4),
            0x05 => alu_a!(op_or, ea_abs!(), 4),
            0x15 => alu_a!(op_or, ea_abs_x!(), 5),
            0x16 => alu_a!(op_or, ea_abs_y!(), 5),
            0x06 => alu_a!(op_or, self.dp(self.x), 3),
            0x07 => alu_a!(op_or, ea_dp_x_ind!(), 6),
            0x17 => alu_a!(op_or, ea_dp_ind_y!(), 6),
            0x08 => {
                let data = fetch8!();
                self.a = self.op_or(self.a, data);
                2
            }
            0x18 => alu_mem_imm!(op_or, 5),
            0x09 => alu_mem!(op_or, 6),
            0x19 => alu_ind!(op_or, 5),
            // AND
            0x24 => alu_a!(op_and, ea_dp!(), 3),
            0x34 => alu_a!(op_and, ea_dp_x!(), 4),
            0x25 => alu_a!(op_and, ea_abs!(), 4),
            0x35 => alu_a!(op_and, ea_abs_x!(), 5),
            0x36 => alu_a!(op_and, ea_abs_y!(), 5),
            0x26 => alu_a!(op_and, self.dp(self.x), 3),
            0x27 => alu_a!(op_and, ea_dp_x_ind!(), 6),
            0x37 => alu_a!(op_and, ea_dp_ind_y!(), 6),
            0x28 => {
                let data = fetch8!();
                self.a = self.op_and(self.a, data);
                2
            }
            0x38 => alu_mem_imm!(op_and, 5),
            0x29 => alu_mem!(op_and, 6),
            0x39 => alu_ind!(op_and, 5),
            // EOR
            0x44 => alu_a!(op_eor, ea_dp!(), 3),
            0x54 => alu_a!(op_eor, ea_dp_x!(), 4),
            0x45 => alu_a!(op_eor, ea_abs!(), 4),
            0x55 => alu_a!(op_eor, ea_abs_x!(), 5),
            0x56 => alu_a!(op_eor, ea_abs_y!(), 5),
            0x46 => alu_a!(op_eor, self.dp(self.x), 3),
            0x47 => alu_a!(op_eor, ea_dp_x_ind!(), 6),
            0x57 => alu_a!(op_eor, ea_dp_ind_y!(), 6),
            0x48 => {
                let data = fetch8!();
                self.a = self.op_eor(self.a, data);
                2
            }
            0x58 => alu_mem_imm!(op_eor, 5),
            0x49 => alu_mem!(op_eor, 6),
            0x59 => alu_ind!(op_eor, 5),
            // CMP
            0x64 => { let d = rd!(ea_dp!()); self.op_cmp(self.a, d); 3 }
            0x74 => { let d = rd!(ea_dp_x!()); self.op_cmp(self.a, d); 4 }
            0x65 => { let d = rd!(ea_abs!()); self.op_cmp(self.a, d); 4 }
            0x75 => { let d = rd!(ea_abs_x!()); self.op_cmp(self.a, d); 5 }
            0x76 => { let d = rd!(ea_abs_y!()); self.op_cmp(self.a, d); 5 }
            0x66 => { let d = rd!(self.dp(self.x)); self.op_cmp(self.a, d); 3 }
            0x67 => { let d = rd!(ea_dp_x_ind!()); self.op_cmp(self.a, d); 6 }
            0x77 => { let d = rd!(ea_dp_ind_y!()); self.op_cmp(self.a, d); 6 }
            0x68 => { let d = fetch8!(); self.op_cmp(self.a, d); 2 }
            0x78 => {
                let rhs = fetch8!();
                let lhs = rd!(ea_dp!());
                self.op_cmp(lhs, rhs);
                5
            }
            0x69 => cmp_mem!(6),
            0x79 => {
                let lhs = rd!(self.dp(self.x));
                let rhs = rd!(self.dp(self.y));
                self.op_cmp(lhs, rhs);
                5
            }
            0xC8 => { let d = fetch8!(); self.op_cmp(self.x, d); 2 }
            0x3E => { let d = rd!(ea_dp!()); self.op_cmp(self.x, d); 3 }
            0x1E => { let d = rd!(ea_abs!()); self.op_cmp(self.x, d); 4 }
            0xAD => { let d = fetch8!(); self.op_cmp(self.y, d); 2 }
            0x7E => { let d = rd!(ea_dp!()); self.op_cmp(self.y, d); 3 }
            0x5E => { let d = rd!(ea_abs!()); self.op_cmp(self.y, d); 4 }
            // ADC
            0x84 => alu_a!(op_adc, ea_dp!(), 3),
            0x94 => alu_a!(op_adc, ea_dp_x!(), 4),
            0x85 => alu_a!(op_adc, ea_abs!(), 4),
            0x95 => alu_a!(op_adc, ea_abs_x!(), 5),
            0x96 => alu_a!(op_adc, ea_abs_y!(), 5),
            0x86 => alu_a!(op_adc, self.dp(self.x), 3),
            0x87 => alu_a!(op_adc, ea_dp_x_ind!(), 6),
            0x97 => alu_a!(op_adc, ea_dp_ind_y!(), 6),
            0x88 => {
                let data = fetch8!();
                self.a = self.op_adc(self.a, data);
                2
            }
            0x98 => alu_mem_imm!(op_adc, 5),
            0x89 => alu_mem!(op_adc, 6),
            0x99 => alu_ind!(op_adc, 5),
            // SBC
            0xA4 => alu_a!(op_sbc, ea_dp!(), 3),
            0xB4 => alu_a!(op_sbc, ea_dp_x!(), 4),
            0xA5 => alu_a!(op_sbc, ea_abs!(), 4),
            0xB5 => alu_a!(op_sbc, ea_abs_x!(), 5),
            0xB6 => alu_a!(op_sbc, ea_abs_y!(), 5),
            0xA6 => alu_a!(op_sbc, self.dp(self.x), 3),
            0xA7 => alu_a!(op_sbc, ea_dp_x_ind!(), 6),
            0xB7 => alu_a!(op_sbc, ea_dp_ind_y!(), 6),
            0xA8 => {
                let data = fetch8!();
                self.a = self.op_sbc(self.a, data);
                2
            }
            0xB8 => alu_mem_imm!(op_sbc, 5),
            0xA9 => alu_mem!(op_sbc, 6),
            0xB9 => alu_ind!(op_sbc, 5),
            // MOV into A
            0xE8 => { let d = fetch8!(); mov_reg!(a, d, 2) }
            0xE4 => { let d = rd!(ea_dp!()); mov_reg!(a, d, 3) }
            0xF4 => { let d = rd!(ea_dp_x!()); mov_reg!(a, d, 4) }
            0xE5 => { let d = rd!(ea_abs!()); mov_reg!(a, d, 4) }
            0xF5 => { let d = rd!(ea_abs_x!()); mov_reg!(a, d, 5) }
            0xF6 => { let d = rd!(ea_abs_y!()); mov_reg!(a, d, 5) }
            0xE6 => { let d = rd!(self.dp(self.x)); mov_reg!(a, d, 3) }
            0xBF => {
                // MOV A,(X)+ post-increments X without touching flags on X
                let d = rd!(self.dp(self.x));
                self.x = self.x.wrapping_add(1);
                mov_reg!(a, d, 4)
            }
            0xE7 => { let d = rd!(ea_dp_x_ind!()); mov_reg!(a, d, 6) }
            0xF7 => { let d = rd!(ea_dp_ind_y!()); mov_reg!(a, d, 6) }
            0x7D => mov_reg!(a, self.x, 2),
            0xDD => mov_reg!(a, self.y, 2),
            // MOV into X/Y
            0xCD => { let d = fetch8!(); mov_reg!(x, d, 2) }
            0xF8 => { let d = rd!(ea_dp!()); mov_reg!(x, d, 3) }
            0xF9 => { let d = rd!(ea_dp_y!()); mov_reg!(x, d, 4) }
            0xE9 => { let d = rd!(ea_abs!()); mov_reg!(x, d, 4) }
            0x5D => mov_reg!(x, self.a, 2),
            0x9D => mov_reg!(x, self.sp, 2),
            0x8D => { let d = fetch8!(); mov_reg!(y, d, 2) }
            0xEB => { let d = rd!(ea_dp!()); mov_reg!(y, d, 3) }
            0xFB => { let d = rd!(ea_dp_x!()); mov_reg!(y, d, 4) }
            0xEC => { let d = rd!(ea_abs!()); mov_reg!(y, d, 4) }
            0xFD => mov_reg!(y, self.a, 2),
            0xBD => { self.sp = self.x; 2 }
            // MOV out of registers; stores leave flags alone
            0xC4 => mov_to!(ea_dp!(), self.a, 4),
            0xD4 => mov_to!(ea_dp_x!(), self.a, 5),
            0xC5 => mov_to!(ea_abs!(), self.a, 5),
            0xD5 => mov_to!(ea_abs_x!(), self.a, 6),
            0xD6 => mov_to!(ea_abs_y!(), self.a, 6),
            0xC6 => mov_to!(self.dp(self.x), self.a, 4),
            0xAF => {
                let addr = self.dp(self.x);
                wr!(addr, self.a);
                self.x = self.x.wrapping_add(1);
                4
            }
            0xC7 => mov_to!(ea_dp_x_ind!(), self.a, 7),
            0xD7 => mov_to!(ea_dp_ind_y!(), self.a, 7),
            0xD8 => mov_to!(ea_dp!(), self.x, 4),
            0xD9 => mov_to!(ea_dp_y!(), self.x, 5),
            0xC9 => mov_to!(ea_abs!(), self.x, 5),
            0xCB => mov_to!(ea_dp!(), self.y, 4),
            0xDB => mov_to!(ea_dp_x!(), self.y, 5),
            0xCC => mov_to!(ea_abs!(), self.y, 5),
            // Memory to memory moves
            0x8F => {
                let value = fetch8!();
                mov_to!(ea_dp!(), value, 5)
            }
            0xFA => {
                let src = ea_dp!();
                let value = rd!(src);
                mov_to!(ea_dp!(), value, 5)
            }
            // Shifts and rotates
            0x0B => rmw!(op_asl, ea_dp!(), 4),
            0x1B => rmw!(op_asl, ea_dp_x!(), 5),
            0x0C => rmw!(op_asl, ea_abs!(), 5),
            0x1C => { self.a = self.op_asl(self.a); 2 }
            0x2B => rmw!(op_rol, ea_dp!(), 4),
            0x3B => rmw!(op_rol, ea_dp_x!(), 5),
            0x2C => rmw!(op_rol, ea_abs!(), 5),
            0x3C => { self.a = self.op_rol(self.a); 2 }
            0x4B => rmw!(op_lsr, ea_dp!(), 4),
            0x5B => rmw!(op_lsr, ea_dp_x!(), 5),
            0x4C => rmw!(op_lsr, ea_abs!(), 5),
            0x5C => { self.a = self.op_lsr(self.a); 2 }
            0x6B => rmw!(op_ror, ea_dp!(), 4),
            0x7B => rmw!(op_ror, ea_dp_x!(), 5),
            0x6C => rmw!(op_ror, ea_abs!(), 5),
            0x7C => { self.a = self.op_ror(self.a); 2 }
            // INC/DEC
            0xAB => rmw!(op_inc, ea_dp!(), 4),
            0xBB => rmw!(op_inc, ea_dp_x!(), 5),
            0xAC => rmw!(op_inc, ea_abs!(), 5),
            0xBC => { self.a = self.op_inc(self.a); 2 }
            0x3D => { self.x = self.op_inc(self.x); 2 }
            0xFC => { self.y = self.op_inc(self.y); 2 }
            0x8B => rmw!(op_dec, ea_dp!(), 4),
            0x9B => rmw!(op_dec, ea_dp_x!(), 5),
            0x8C => rmw!(op_dec, ea_abs!(), 5),
            0x9C => { self.a = self.op_dec(self.a); 2 }
            0x1D => { self.x = self.op_dec(self.x); 2 }
            0xDC => { self.y = self.op_dec(self.y); 2 }
            // Word operations on direct-page pairs
            0xBA => {
                let offset = fetch8!();
                let word = rd_dp16!(offset);
                self.a = word as u8;
                self.y = (word >> 8) as u8;
                self.set_nz16(word);
                5
            }
            0xDA => {
                let offset = fetch8!();
                wr!(self.dp(offset), self.a);
                wr!(self.dp(offset.wrapping_add(1)), self.y);
                5
            }
            0x3A => {
                let offset = fetch8!();
                let word = rd_dp16!(offset).wrapping_add(1);
                wr!(self.dp(offset), word as u8);
                wr!(self.dp(offset.wrapping_add(1)), (word >> 8) as u8);
                self.set_nz16(word);
                6
            }
            0x1A => {
                let offset = fetch8!();
                let word = rd_dp16!(offset).wrapping_sub(1);
                wr!(self.dp(offset), word as u8);
                wr!(self.dp(offset.wrapping_add(1)), (word >> 8) as u8);
                self.set_nz16(word);
                6
            }
            0x7A => {
                let offset = fetch8!();
                let word = rd_dp16!(offset);
                let ya = self.ya();
                let result = ya as u32 + word as u32;
                self.psw.c = result > 0xFFFF;
                self.psw.v = !(ya ^ word) & (ya ^ result as u16) & 0x8000 != 0;
                self.psw.h = (ya & 0x0FFF) + (word & 0x0FFF) > 0x0FFF;
                self.set_ya(result as u16);
                self.set_nz16(result as u16);
                5
            }
            0x9A => {
                let offset = fetch8!();
                let word = rd_dp16!(offset);
                let ya = self.ya();
                let result = (ya as i32 - word as i32) as u32;
                self.psw.c = ya >= word;
                self.psw.v = (ya ^ word) & (ya ^ result as u16) & 0x8000 != 0;
                self.psw.h = (ya & 0x0FFF) >= (word & 0x0FFF);
                self.set_ya(result as u16);
                self.set_nz16(result as u16);
                5
            }
            0x5A => {
                let offset = fetch8!();
                let word = rd_dp16!(offset);
                let ya = self.ya();
                let result = ya.wrapping_sub(word);
                self.psw.c = ya >= word;
                self.set_nz16(result);
                4
            }
            // Bit instructions on a 13bit absolute address
            0x0A => {
                let (addr, bit) = abs_bit!();
                self.psw.c |= rd!(addr) & (1 << bit) != 0;
                5
            }
            0x2A => {
                let (addr, bit) = abs_bit!();
                self.psw.c |= rd!(addr) & (1 << bit) == 0;
                5
            }
            0x4A => {
                let (addr, bit) = abs_bit!();
                self.psw.c &= rd!(addr) & (1 << bit) != 0;
                4
            }
            0x6A => {
                let (addr, bit) = abs_bit!();
                self.psw.c &= rd!(addr) & (1 << bit) == 0;
                4
            }
            0x8A => {
                let (addr, bit) = abs_bit!();
                self.psw.c ^= rd!(addr) & (1 << bit) != 0;
                5
            }
            0xAA => {
                let (addr, bit) = abs_bit!();
                self.psw.c = rd!(addr) & (1 << bit) != 0;
                4
            }
            0xCA => {
                let (addr, bit) = abs_bit!();
                let data = rd!(addr);
                let result = if self.psw.c {
                    data | (1 << bit)
                } else {
                    data & !(1 << bit)
                };
                wr!(addr, result);
                6
            }
            0xEA => {
                let (addr, bit) = abs_bit!();
                let data = rd!(addr);
                wr!(addr, data ^ (1 << bit));
                5
            }
            0x0E => {
                let addr = ea_abs!();
                let data = rd!(addr);
                self.set_nz(self.a.wrapping_sub(data));
                wr!(addr, data | self.a);
                6
            }
            0x4E => {
                let addr = ea_abs!();
                let data = rd!(addr);
                self.set_nz(self.a.wrapping_sub(data));
                wr!(addr, data & !self.a);
                6
            }
            // Compare-and-branch loops
            0x2E => {
                let addr = ea_dp!();
                let offset = fetch8!() as i8;
                if self.a != rd!(addr) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    7
                } else {
                    5
                }
            }
            0xDE => {
                let addr = ea_dp_x!();
                let offset = fetch8!() as i8;
                if self.a != rd!(addr) {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    8
                } else {
                    6
                }
            }
            0x6E => {
                let addr = ea_dp!();
                let offset = fetch8!() as i8;
                let data = rd!(addr).wrapping_sub(1);
                wr!(addr, data);
                if data != 0 {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    7
                } else {
                    5
                }
            }
            0xFE => {
                let offset = fetch8!() as i8;
                self.y = self.y.wrapping_sub(1);
                if self.y != 0 {
                    self.pc = self.pc.wrapping_add(offset as u16);
                    6
                } else {
                    4
                }
            }
            // Flow control
            0x5F => {
                self.pc = ea_abs!();
                3
            }
            0x1F => {
                let pointer = ea_abs_x!();
                self.pc = rd!(pointer) as u16 | ((rd!(pointer.wrapping_add(1)) as u16) << 8);
                6
            }
            0x3F => {
                let target = ea_abs!();
                let pc = self.pc;
                self.push16(pc, mem, mailbox);
                self.pc = target;
                8
            }
            0x4F => {
                let offset = fetch8!();
                let pc = self.pc;
                self.push16(pc, mem, mailbox);
                self.pc = 0xFF00 | offset as u16;
                6
            }
            0x6F => {
                self.pc = self.pull16(mem, mailbox);
                5
            }
            0x7F => {
                let psw = self.pull8(mem, mailbox);
                self.psw.set_value(psw);
                self.pc = self.pull16(mem, mailbox);
                6
            }
            0x0F => {
                let pc = self.pc;
                self.push16(pc, mem, mailbox);
                let psw = self.psw.value();
                self.push8(psw, mem, mailbox);
                self.psw.b = true;
                self.psw.i = false;
                self.pc = rd!(0xFFDE) as u16 | ((rd!(0xFFDF) as u16) << 8);
                8
            }
            // Stack
            0x0D => { let v = self.psw.value(); self.push8(v, mem, mailbox); 4 }
            0x2D => { let v = self.a; self.push8(v, mem, mailbox); 4 }
            0x4D => { let v = self.x; self.push8(v, mem, mailbox); 4 }
            0x6D => { let v = self.y; self.push8(v, mem, mailbox); 4 }
            0x8E => { let v = self.pull8(mem, mailbox); self.psw.set_value(v); 4 }
            0xAE => { self.a = self.pull8(mem, mailbox); 4 }
            0xCE => { self.x = self.pull8(mem, mailbox); 4 }
            0xEE => { self.y = self.pull8(mem, mailbox); 4 }
            // Arithmetic specials
            0xCF => {
                let product = self.y as u16 * self.a as u16;
                self.set_ya(product);
                self.set_nz(self.y);
                9
            }
            0x9E => {
                // YA / X with the documented overflow behavior
                let ya = self.ya();
                let x = self.x as u16;
                self.psw.h = (self.y & 0x0F) >= (self.x & 0x0F);
                if (self.y as u16) < x {
                    self.a = (ya / x) as u8;
                    self.y = (ya % x) as u8;
                    self.psw.v = false;
                } else {
                    let rebased = ya.wrapping_sub(x << 9);
                    let divisor = 256 - x;
                    self.a = (255u16.wrapping_sub(rebased / divisor)) as u8;
                    self.y = (x.wrapping_add(rebased % divisor)) as u8;
                    self.psw.v = true;
                }
                self.set_nz(self.a);
                12
            }
            0xDF => {
                // Decimal adjust after addition
                if self.psw.c || self.a > 0x99 {
                    self.a = self.a.wrapping_add(0x60);
                    self.psw.c = true;
                }
                if self.psw.h || self.a & 0x0F > 0x09 {
                    self.a = self.a.wrapping_add(0x06);
                }
                self.set_nz(self.a);
                3
            }
            0xBE => {
                // Decimal adjust after subtraction
                if !self.psw.c || self.a > 0x99 {
                    self.a = self.a.wrapping_sub(0x60);
                    self.psw.c = false;
                }
                if !self.psw.h || self.a & 0x0F > 0x09 {
                    self.a = self.a.wrapping_sub(0x06);
                }
                self.set_nz(self.a);
                3
            }
            0x9F => {
                // Nibble swap
                self.a = self.a.rotate_right(4);
                self.set_nz(self.a);
                5
            }
            // Halt states
            0xEF => {
                self.sleeping = true;
                3
            }
            0xFF => {
                self.stopped = true;
                3
            }
        }
    }

    fn ya(&self) -> u16 {
        ((self.y as u16) << 8) | self.a as u16
    }

    fn set_ya(&mut self, value: u16) {
        self.a = value as u8;
        self.y = (value >> 8) as u8;
    }

    fn set_nz(&mut self, value: u8) {
        self.psw.n = value > 0x7F;
        self.psw.z = value == 0;
    }

    fn set_nz16(&mut self, value: u16) {
        self.psw.n = value > 0x7FFF;
        self.psw.z = value == 0;
    }

    fn op_or(&mut self, lhs: u8, rhs: u8) -> u8 {
        let result = lhs | rhs;
        self.set_nz(result);
        result
    }

    fn op_and(&mut self, lhs: u8, rhs: u8) -> u8 {
        let result = lhs & rhs;
        self.set_nz(result);
        result
    }

    fn op_eor(&mut self, lhs: u8, rhs: u8) -> u8 {
        let result = lhs ^ rhs;
        self.set_nz(result);
        result
    }

    fn op_adc(&mut self, lhs: u8, rhs: u8) -> u8 {
        let result = lhs as u16 + rhs as u16 + self.psw.c as u16;
        self.psw.h = (lhs & 0x0F) + (rhs & 0x0F) + self.psw.c as u8 > 0x0F;
        self.psw.c = result > 0xFF;
        let result = result as u8;
        self.psw.v = !(lhs ^ rhs) & (lhs ^ result) & 0x80 != 0;
        self.set_nz(result);
        result
    }

    fn op_sbc(&mut self, lhs: u8, rhs: u8) -> u8 {
        self.op_adc(lhs, !rhs)
    }

    fn op_cmp(&mut self, lhs: u8, rhs: u8) {
        let result = lhs as i16 - rhs as i16;
        self.psw.c = result >= 0;
        self.set_nz(result as u8);
    }

    fn op_asl(&mut self, data: u8) -> u8 {
        self.psw.c = data & 0x80 != 0;
        let result = data << 1;
        self.set_nz(result);
        result
    }

    fn op_lsr(&mut self, data: u8) -> u8 {
        self.psw.c = data & 0x01 != 0;
        let result = data >> 1;
        self.set_nz(result);
        result
    }

    fn op_rol(&mut self, data: u8) -> u8 {
        let carry_out = data & 0x80 != 0;
        let result = (data << 1) | self.psw.c as u8;
        self.psw.c = carry_out;
        self.set_nz(result);
        result
    }

    fn op_ror(&mut self, data: u8) -> u8 {
        let carry_out = data & 0x01 != 0;
        let result = (data >> 1) | ((self.psw.c as u8) << 7);
        self.psw.c = carry_out;
        self.set_nz(result);
        result
    }

    fn op_inc(&mut self, data: u8) -> u8 {
        let result = data.wrapping_add(1);
        self.set_nz(result);
        result
    }

    fn op_dec(&mut self, data: u8) -> u8 {
        let result = data.wrapping_sub(1);
        self.set_nz(result);
        result
    }

    // The stack lives in page $01

    fn push8(&mut self, value: u8, mem: &mut ApuMem, mailbox: &mut Mailbox) {
        mem.write8(0x0100 | self.sp as u16, value, mailbox);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn push16(&mut self, value: u16, mem: &mut ApuMem, mailbox: &mut Mailbox) {
        self.push8((value >> 8) as u8, mem, mailbox);
        self.push8(value as u8, mem, mailbox);
    }

    fn pull8(&mut self, mem: &mut ApuMem, mailbox: &mut Mailbox) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        mem.read8(0x0100 | self.sp as u16, mailbox)
    }

    fn pull16(&mut self, mem: &mut ApuMem, mailbox: &mut Mailbox) -> u16 {
        let low = self.pull8(mem, mailbox) as u16;
        let high = self.pull8(mem, mailbox) as u16;
        (high << 8) | low
    }
}

impl Default for Spc700 {
    fn default() -> Self {
        Self::new()
    }
}

impl Spc700 {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.put_u8(self.a);
        w.put_u8(self.x);
        w.put_u8(self.y);
        w.put_u8(self.sp);
        w.put_u16(self.pc);
        w.put_u8(self.psw.value());
        w.put_bool(self.sleeping);
        w.put_bool(self.stopped);
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        self.a = r.take_u8();
        self.x = r.take_u8();
        self.y = r.take_u8();
        self.sp = r.take_u8();
        self.pc = r.take_u16();
        self.psw.set_value(r.take_u8());
        self.sleeping = r.take_bool();
        self.stopped = r.take_bool();
    }
}
