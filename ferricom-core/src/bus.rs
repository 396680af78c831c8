use log::debug;

use crate::apu::mailbox::Mailbox;
use crate::cartridge::Cartridge;
use crate::cheat::CheatTable;
use crate::dma::{self, Dma};
use crate::gsu::Gsu;
use crate::joypad::JoyIo;
use crate::mmap;
use crate::mpydiv::MpyDiv;
use crate::ppu;

const WRAM_SIZE: usize = 128 * 1024;

/// The main address bus and its memory-mapped register file
///
/// Every CPU and DMA access funnels through [`read8`]/[`write8`]; reads of
/// unmapped space return the open-bus latch, the last byte the bus drove.
///
/// [`read8`]: Bus::read8
/// [`write8`]: Bus::write8
pub struct Bus {
    pub wram: Box<[u8]>,
    pub cartridge: Option<Cartridge>,
    pub ppu: ppu::Ports,
    pub dma: Dma,
    pub mpy_div: MpyDiv,
    pub joy: JoyIo,
    pub mailbox: Mailbox,
    pub cheats: CheatTable,
    pub gsu: Option<Gsu>,
    // On-chip CPU control registers
    nmitimen: u8,
    wr_io: u8,
    htime: u16,
    vtime: u16,
    memsel: u8,
    rd_nmi: u8,
    time_up: u8,
    in_vblank: bool,
    /// WRAM port cursor for $2180-$2183
    wm_addr: u32,
    open_bus: u8,
    /// Master cycles owed to DMA, drained by the scheduler
    dma_debt: u32,
}

impl Bus {
    pub fn new(cartridge: Option<Cartridge>) -> Bus {
        let gsu = match &cartridge {
            Some(cart) if cart.chip() == crate::cartridge::Chip::Risc => Some(Gsu::new()),
            _ => None,
        };
        Bus {
            wram: vec![0; WRAM_SIZE].into_boxed_slice(),
            cartridge,
            ppu: ppu::Ports::new(),
            dma: Dma::new(),
            mpy_div: MpyDiv::new(),
            joy: JoyIo::new(),
            mailbox: Mailbox::new(),
            cheats: CheatTable::new(),
            gsu,
            nmitimen: 0x00,
            wr_io: 0xFF,
            htime: 0x01FF,
            vtime: 0x01FF,
            memsel: 0x00,
            rd_nmi: 0x00,
            time_up: 0x00,
            in_vblank: false,
            wm_addr: 0,
            open_bus: 0,
            dma_debt: 0,
        }
    }

    #[cfg(test)]
    pub fn new_no_cartridge() -> Bus {
        Bus::new(None)
    }

    pub fn reset(&mut self) {
        self.ppu = ppu::Ports::new();
        self.dma.reset();
        self.mpy_div = MpyDiv::new();
        self.mailbox.clear();
        self.nmitimen = 0;
        self.rd_nmi = 0;
        self.time_up = 0;
        self.in_vblank = false;
        self.wm_addr = 0;
        self.dma_debt = 0;
        if let Some(gsu) = &mut self.gsu {
            gsu.reset();
        }
    }

    /// Reads one byte, consulting the cheat table and feeding the open bus
    pub fn read8(&mut self, addr: u32) -> u8 {
        let addr = addr & 0x00FF_FFFF;
        let raw = self.decode_read(addr).unwrap_or(self.open_bus);
        let value = if self.cheats.is_empty() {
            raw
        } else {
            self.cheats.apply(addr, raw)
        };
        self.open_bus = value;
        value
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        let addr = addr & 0x00FF_FFFF;
        self.open_bus = value;
        self.decode_write(addr, value);
    }

    fn decode_read(&mut self, addr: u32) -> Option<u8> {
        let bank = (addr >> 16) as usize;
        let offset = (addr & 0xFFFF) as usize;
        match bank {
            mmap::WRAM_FIRST_BANK..=mmap::WRAM_LAST_BANK => {
                Some(self.wram[(bank - mmap::WRAM_FIRST_BANK) * 0x10000 + offset])
            }
            mmap::SYSLR_WS1_FIRST_BANK..=mmap::SYSLR_WS1_LAST_BANK
            | mmap::SYSLR_WS2_FIRST_BANK..=mmap::SYSLR_WS2_LAST_BANK
                if offset <= mmap::SYS_LAST =>
            {
                self.read_system(bank, offset)
            }
            _ => self
                .cartridge
                .as_ref()
                .and_then(|cart| cart.read(bank, offset)),
        }
    }

    fn decode_write(&mut self, addr: u32, value: u8) {
        let bank = (addr >> 16) as usize;
        let offset = (addr & 0xFFFF) as usize;
        match bank {
            mmap::WRAM_FIRST_BANK..=mmap::WRAM_LAST_BANK => {
                self.wram[(bank - mmap::WRAM_FIRST_BANK) * 0x10000 + offset] = value;
            }
            mmap::SYSLR_WS1_FIRST_BANK..=mmap::SYSLR_WS1_LAST_BANK
            | mmap::SYSLR_WS2_FIRST_BANK..=mmap::SYSLR_WS2_LAST_BANK
                if offset <= mmap::SYS_LAST =>
            {
                self.write_system(bank, offset, value);
            }
            _ => {
                if let Some(cart) = &mut self.cartridge {
                    cart.write(bank, offset, value);
                }
            }
        }
    }

    /// System area of the shared banks, `$0000-$7FFF`
    fn read_system(&mut self, bank: usize, offset: usize) -> Option<u8> {
        match offset {
            mmap::WRAM_MIRROR_FIRST..=mmap::WRAM_MIRROR_LAST => Some(self.wram[offset]),
            mmap::PPU_IO_FIRST..=mmap::PPU_IO_LAST => self.ppu.read(offset),
            mmap::APU_IO_FIRST..=mmap::APU_IO_LAST => {
                Some(self.mailbox.cpu_read(offset - mmap::APU_IO_FIRST))
            }
            mmap::WMDATA => {
                let value = self.wram[self.wm_addr as usize & (WRAM_SIZE - 1)];
                self.wm_addr = (self.wm_addr + 1) & 0x1FFFF;
                Some(value)
            }
            mmap::GSU_IO_FIRST..=mmap::GSU_IO_LAST if self.gsu.is_some() => {
                Some(self.gsu.as_mut().unwrap().read_register(offset))
            }
            mmap::EXP_FIRST..=mmap::EXP_LAST if self.gsu.is_some() => {
                Some(self.gsu.as_ref().unwrap().read_ram(offset - mmap::EXP_FIRST))
            }
            mmap::JOYA => {
                // Serial pad bit in bit 0, open bus elsewhere
                Some((self.open_bus & 0xFC) | self.joy.read_serial())
            }
            mmap::JOYB => Some((self.open_bus & 0xFC) | self.joy.read_serial_b() | 0x1C),
            mmap::RDNMI => {
                let value = self.rd_nmi | 0x02;
                self.rd_nmi &= 0x7F;
                Some(value)
            }
            mmap::TIMEUP => {
                let value = self.time_up;
                self.time_up &= 0x7F;
                Some(value)
            }
            mmap::HVBJOY => Some(if self.in_vblank { 0x80 } else { 0x00 }),
            mmap::RDIO => Some(self.wr_io),
            mmap::RDDIVL => Some(self.mpy_div.quotient_low()),
            mmap::RDDIVH => Some(self.mpy_div.quotient_high()),
            mmap::RDMPYL => Some(self.mpy_div.product_low()),
            mmap::RDMPYH => Some(self.mpy_div.product_high()),
            mmap::JOY1L => Some(self.joy.auto_read_low()),
            mmap::JOY1H => Some(self.joy.auto_read_high()),
            mmap::JOY2L..=mmap::JOY4H => Some(0x00),
            mmap::DMA_FIRST..=mmap::DMA_LAST => self.dma.read(offset),
            _ => self
                .cartridge
                .as_ref()
                .and_then(|cart| cart.read(bank, offset)),
        }
    }

    fn write_system(&mut self, bank: usize, offset: usize, value: u8) {
        match offset {
            mmap::WRAM_MIRROR_FIRST..=mmap::WRAM_MIRROR_LAST => self.wram[offset] = value,
            mmap::PPU_IO_FIRST..=mmap::PPU_IO_LAST => self.ppu.write(offset, value),
            mmap::APU_IO_FIRST..=mmap::APU_IO_LAST => {
                self.mailbox.cpu_write(offset - mmap::APU_IO_FIRST, value);
            }
            mmap::WMDATA => {
                self.wram[self.wm_addr as usize & (WRAM_SIZE - 1)] = value;
                self.wm_addr = (self.wm_addr + 1) & 0x1FFFF;
            }
            mmap::WMADDL => self.wm_addr = (self.wm_addr & 0x1FF00) | value as u32,
            mmap::WMADDM => self.wm_addr = (self.wm_addr & 0x100FF) | ((value as u32) << 8),
            mmap::WMADDH => {
                self.wm_addr = (self.wm_addr & 0x0FFFF) | (((value & 0x01) as u32) << 16)
            }
            mmap::GSU_IO_FIRST..=mmap::GSU_IO_LAST if self.gsu.is_some() => {
                self.gsu.as_mut().unwrap().write_register(offset, value);
            }
            mmap::EXP_FIRST..=mmap::EXP_LAST if self.gsu.is_some() => {
                self.gsu
                    .as_mut()
                    .unwrap()
                    .write_ram(offset - mmap::EXP_FIRST, value);
            }
            mmap::JOYWR => self.joy.write_strobe(value),
            mmap::NMITIMEN => self.nmitimen = value,
            mmap::WRIO => self.wr_io = value,
            mmap::WRMPYA => self.mpy_div.set_multiplicand(value),
            mmap::WRMPYB => self.mpy_div.set_multiplier(value),
            mmap::WRDIVL => self.mpy_div.set_dividend_low(value),
            mmap::WRDIVH => self.mpy_div.set_dividend_high(value),
            mmap::WRDIVB => self.mpy_div.set_divisor(value),
            mmap::HTIMEL => self.htime = (self.htime & 0x0100) | value as u16,
            mmap::HTIMEH => self.htime = (((value & 0x01) as u16) << 8) | (self.htime & 0x00FF),
            mmap::VTIMEL => self.vtime = (self.vtime & 0x0100) | value as u16,
            mmap::VTIMEH => self.vtime = (((value & 0x01) as u16) << 8) | (self.vtime & 0x00FF),
            mmap::MDMAEN => {
                // General DMA stalls the CPU until every channel finishes
                let cycles = dma::run_gdma(self, value);
                self.dma_debt += cycles;
            }
            mmap::HDMAEN => self.dma.write_hdma_enable(value),
            mmap::MEMSEL => self.memsel = value,
            mmap::DMA_FIRST..=mmap::DMA_LAST => self.dma.write(offset, value),
            _ => {
                if let Some(cart) = &mut self.cartridge {
                    if !cart.write(bank, offset, value) {
                        debug!(
                            "Unhandled write ${:02X}:{:04X} = ${:02X}",
                            bank, offset, value
                        );
                    }
                }
            }
        }
    }

    // 16/24bit helpers; the second/third byte address wraps per the caller's
    // addressing mode

    pub fn addr_wrapping_read16(&mut self, addr: u32) -> u16 {
        self.read8(addr) as u16 | ((self.read8(addr_wrapping_add(addr, 1)) as u16) << 8)
    }

    pub fn bank_wrapping_read16(&mut self, addr: u32) -> u16 {
        self.read8(addr) as u16 | ((self.read8(bank_wrapping_add(addr, 1)) as u16) << 8)
    }

    pub fn bank_wrapping_read24(&mut self, addr: u32) -> u32 {
        self.read8(addr) as u32
            | ((self.read8(bank_wrapping_add(addr, 1)) as u32) << 8)
            | ((self.read8(bank_wrapping_add(addr, 2)) as u32) << 16)
    }

    pub fn page_wrapping_read16(&mut self, addr: u32) -> u16 {
        self.read8(addr) as u16 | ((self.read8(page_wrapping_add(addr, 1)) as u16) << 8)
    }

    pub fn page_wrapping_read24(&mut self, addr: u32) -> u32 {
        self.read8(addr) as u32
            | ((self.read8(page_wrapping_add(addr, 1)) as u32) << 8)
            | ((self.read8(page_wrapping_add(addr, 2)) as u32) << 16)
    }

    pub fn addr_wrapping_write16(&mut self, addr: u32, value: u16) {
        self.write8(addr, value as u8);
        self.write8(addr_wrapping_add(addr, 1), (value >> 8) as u8);
    }

    pub fn bank_wrapping_write16(&mut self, addr: u32, value: u16) {
        self.write8(addr, value as u8);
        self.write8(bank_wrapping_add(addr, 1), (value >> 8) as u8);
    }

    pub fn page_wrapping_write16(&mut self, addr: u32, value: u16) {
        self.write8(addr, value as u8);
        self.write8(page_wrapping_add(addr, 1), (value >> 8) as u8);
    }

    /// Operand fetches follow the program bank and wrap inside it
    pub fn fetch_operand8(&mut self, addr: u32) -> u8 {
        self.read8(bank_wrapping_add(addr, 1))
    }

    pub fn fetch_operand16(&mut self, addr: u32) -> u16 {
        self.bank_wrapping_read16(bank_wrapping_add(addr, 1))
    }

    pub fn fetch_operand24(&mut self, addr: u32) -> u32 {
        self.bank_wrapping_read24(bank_wrapping_add(addr, 1))
    }

    // Interrupt plumbing between the scheduler, PPU and CPU

    pub fn set_vblank(&mut self, on: bool) {
        self.in_vblank = on;
        if on {
            self.rd_nmi |= 0x80;
            if self.nmitimen & 0x01 != 0 {
                self.joy.latch_auto_read();
            }
        } else {
            self.rd_nmi &= 0x7F;
        }
    }

    pub fn nmi_enabled(&self) -> bool {
        self.nmitimen & 0x80 != 0
    }

    /// Raises the timer flag when the armed H/V condition matches `line`
    ///
    /// The flag stays up until TIMEUP is read, so the IRQ line is level
    /// triggered.
    pub fn check_irq(&mut self, line: u16) {
        let fires = match (self.nmitimen >> 4) & 0x3 {
            0 => false,
            // H timer approximated to one assertion per line
            1 => true,
            _ => line == self.vtime,
        };
        if fires {
            self.time_up |= 0x80;
        }
    }

    pub fn irq_asserted(&self) -> bool {
        self.time_up & 0x80 != 0
    }

    /// Drains master cycles spent by DMA since the last call
    pub fn take_dma_debt(&mut self) -> u32 {
        std::mem::take(&mut self.dma_debt)
    }

    pub fn memsel(&self) -> u8 {
        self.memsel
    }
}

pub fn addr_wrapping_add(addr: u32, offset: u32) -> u32 {
    (addr + offset) & 0x00FF_FFFF
}

pub fn bank_wrapping_add(addr: u32, offset: u16) -> u32 {
    (addr & 0xFF0000) | ((addr as u16).wrapping_add(offset) as u32)
}

pub fn page_wrapping_add(addr: u32, offset: u8) -> u32 {
    (addr & 0xFFFF00) | ((addr as u8).wrapping_add(offset) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::tests::lorom_image;
    use crate::cheat::Patch;

    #[test]
    fn wrapping_adds() {
        assert_eq!(0xAAABA9, bank_wrapping_add(0xAAAAAA, 0xFF));
        assert_eq!(0xAA2AA9, bank_wrapping_add(0xAAAAAA, 0x7FFF));
        assert_eq!(0xAAAAB9, page_wrapping_add(0xAAAAAA, 0xF));
        assert_eq!(0x000000, addr_wrapping_add(0xFFFFFF, 1));
    }

    #[test]
    fn wram_banks_and_mirror() {
        let mut bus = Bus::new_no_cartridge();
        bus.write8(0x7E1234, 0xAB);
        assert_eq!(0xAB, bus.read8(0x7E1234));
        // The first 8 KiB mirror into the system banks
        bus.write8(0x7E0042, 0x55);
        assert_eq!(0x55, bus.read8(0x000042));
        assert_eq!(0x55, bus.read8(0xBF0042));
        bus.write8(0x801000, 0x66);
        assert_eq!(0x66, bus.read8(0x7E1000));
    }

    #[test]
    fn bank_wrapping_wram_access() {
        let mut bus = Bus::new_no_cartridge();
        bus.bank_wrapping_write16(0x7FFFFF, 0xABCD);
        assert_eq!(0xCD, bus.wram[0x1FFFF]);
        assert_eq!(0xAB, bus.wram[0x10000]);
        assert_eq!(0xABCD, bus.bank_wrapping_read16(0x7FFFFF));
    }

    #[test]
    fn wram_port_increments() {
        let mut bus = Bus::new_no_cartridge();
        bus.write8(0x002181, 0x00);
        bus.write8(0x002182, 0x10);
        bus.write8(0x002183, 0x00);
        bus.write8(0x002180, 0x11);
        bus.write8(0x002180, 0x22);
        assert_eq!(0x11, bus.wram[0x1000]);
        assert_eq!(0x22, bus.wram[0x1001]);
    }

    #[test]
    fn multiply_registers() {
        let mut bus = Bus::new_no_cartridge();
        bus.write8(0x004202, 0x04);
        bus.write8(0x004203, 0x05);
        assert_eq!(0x14, bus.read8(0x004216));
        assert_eq!(0x00, bus.read8(0x004217));
    }

    #[test]
    fn divide_registers() {
        let mut bus = Bus::new_no_cartridge();
        bus.write8(0x004204, 0x10);
        bus.write8(0x004205, 0x27);
        bus.write8(0x004206, 0x05);
        assert_eq!(0xD0, bus.read8(0x004214));
        assert_eq!(0x07, bus.read8(0x004215));
        assert_eq!(0x00, bus.read8(0x004216));

        bus.write8(0x004204, 0x01);
        bus.write8(0x004205, 0x00);
        bus.write8(0x004206, 0x00);
        assert_eq!(0xFF, bus.read8(0x004214));
        assert_eq!(0xFF, bus.read8(0x004215));
        assert_eq!(0x01, bus.read8(0x004216));
    }

    #[test]
    fn rdnmi_clears_on_read() {
        let mut bus = Bus::new_no_cartridge();
        bus.set_vblank(true);
        assert_eq!(0x80, bus.read8(0x004210) & 0x80);
        assert_eq!(0x00, bus.read8(0x004210) & 0x80);
    }

    #[test]
    fn open_bus_returns_last_value() {
        let mut bus = Bus::new_no_cartridge();
        bus.write8(0x7E0000, 0x7A);
        assert_eq!(0x7A, bus.read8(0x7E0000));
        // $00:5000 decodes to nothing without a cartridge
        assert_eq!(0x7A, bus.read8(0x005000));
    }

    #[test]
    fn cheat_patch_gates_on_compare() {
        let mut bus = Bus::new(Some(crate::Cartridge::new(lorom_image()).unwrap()));
        bus.cheats.insert(Patch {
            addr: 0x7E0100,
            data: 0x42,
            compare: Some(0x37),
        });
        bus.write8(0x7E0100, 0x37);
        assert_eq!(0x42, bus.read8(0x7E0100));
        bus.write8(0x7E0100, 0x38);
        assert_eq!(0x38, bus.read8(0x7E0100));
    }

    #[test]
    fn gdma_fills_wram_pattern_to_ppu() {
        let mut bus = Bus::new_no_cartridge();
        // Stage four bytes in wram
        for (i, v) in [0x01, 0x02, 0x03, 0x04].iter().enumerate() {
            bus.write8(0x7E2000 + i as u32, *v);
        }
        // Channel 0: mode 0, A-bus increment, to $2122 (CGDATA)
        bus.write8(0x004300, 0x00);
        bus.write8(0x004301, 0x22);
        bus.write8(0x004302, 0x00);
        bus.write8(0x004303, 0x20);
        bus.write8(0x004304, 0x7E);
        bus.write8(0x004305, 0x04);
        bus.write8(0x004306, 0x00);
        bus.write8(0x00420B, 0x01);
        // Two cgram words were written through the data port
        assert_eq!(0x0201, bus.ppu.cgram.color(0));
        assert_eq!(0x0403, bus.ppu.cgram.color(1));
        // Count cleared, address advanced, cycles charged
        assert_eq!(0x00, bus.read8(0x004305));
        assert_eq!(0x00, bus.read8(0x004306));
        assert_eq!(0x04, bus.read8(0x004302));
        assert_eq!(32, bus.take_dma_debt());
    }

    #[test]
    fn gdma_count_zero_is_full_bank() {
        let mut bus = Bus::new_no_cartridge();
        bus.write8(0x004300, 0x00);
        bus.write8(0x004301, 0x80); // APU port 0, harmless sink
        bus.write8(0x004302, 0x00);
        bus.write8(0x004303, 0x00);
        bus.write8(0x004304, 0x7E);
        bus.write8(0x004305, 0x00);
        bus.write8(0x004306, 0x00);
        bus.write8(0x00420B, 0x01);
        assert_eq!(64 * 1024 * 8, bus.take_dma_debt());
    }

    #[test]
    fn hdma_terminator_ends_channel() {
        let mut bus = Bus::new_no_cartridge();
        // Table at $7E3000: one line transferring $20, then the terminator
        bus.write8(0x7E3000, 0x01);
        bus.write8(0x7E3001, 0x20);
        bus.write8(0x7E3002, 0x00);
        // Channel 0: direct mode 0 to $2100 (INIDISP)
        bus.write8(0x004300, 0x00);
        bus.write8(0x004301, 0x00);
        bus.write8(0x004302, 0x00);
        bus.write8(0x004303, 0x30);
        bus.write8(0x004304, 0x7E);
        bus.write8(0x00420C, 0x01);

        dma::init_hdma_frame(&mut bus);
        dma::run_hdma_line(&mut bus);
        assert_eq!(0x20, bus.ppu.io.ini_disp);
        assert!(bus.dma.channels[0].do_transfer == false);

        // Line 1 hits the terminator; no further transfers this frame
        bus.ppu.io.ini_disp = 0x00;
        dma::run_hdma_line(&mut bus);
        assert!(!bus.dma.channels[0].hdma_active);
        assert_eq!(0x00, bus.ppu.io.ini_disp);
        dma::run_hdma_line(&mut bus);
        assert_eq!(0x00, bus.ppu.io.ini_disp);
    }

    #[test]
    fn hdma_repeat_streams_fresh_bytes() {
        let mut bus = Bus::new_no_cartridge();
        // Repeat entry covering three lines with three brightness values
        bus.write8(0x7E3000, 0x83);
        bus.write8(0x7E3001, 0x01);
        bus.write8(0x7E3002, 0x02);
        bus.write8(0x7E3003, 0x03);
        bus.write8(0x7E3004, 0x00);
        bus.write8(0x004300, 0x00);
        bus.write8(0x004301, 0x00);
        bus.write8(0x004302, 0x00);
        bus.write8(0x004303, 0x30);
        bus.write8(0x004304, 0x7E);
        bus.write8(0x00420C, 0x01);

        dma::init_hdma_frame(&mut bus);
        for expected in [0x01, 0x02, 0x03] {
            dma::run_hdma_line(&mut bus);
            assert_eq!(expected, bus.ppu.io.ini_disp);
        }
        dma::run_hdma_line(&mut bus);
        assert!(!bus.dma.channels[0].hdma_active);
    }
}

impl Bus {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.put_bytes(&self.wram);
        w.put_u32(self.wm_addr);
        w.put_u8(self.nmitimen);
        w.put_u8(self.wr_io);
        w.put_u16(self.htime);
        w.put_u16(self.vtime);
        w.put_u8(self.memsel);
        w.put_u8(self.rd_nmi);
        w.put_u8(self.time_up);
        w.put_bool(self.in_vblank);
        w.put_u8(self.open_bus);
        self.mpy_div.save_state(w);
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        r.take_bytes(&mut self.wram);
        self.wm_addr = r.take_u32();
        self.nmitimen = r.take_u8();
        self.wr_io = r.take_u8();
        self.htime = r.take_u16();
        self.vtime = r.take_u16();
        self.memsel = r.take_u8();
        self.rd_nmi = r.take_u8();
        self.time_up = r.take_u8();
        self.in_vblank = r.take_bool();
        self.open_bus = r.take_u8();
        self.mpy_div.load_state(r);
        self.dma_debt = 0;
    }
}
