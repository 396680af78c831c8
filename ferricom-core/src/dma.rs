use crate::bus::Bus;

/// Master cycles charged per general DMA byte
const GDMA_CYCLES_PER_BYTE: u32 = 8;
/// Master cycles stolen per HDMA byte each line
const HDMA_CYCLES_PER_BYTE: u32 = 4;

/// One DMA channel's register file plus its HDMA line state
#[derive(Clone)]
pub struct Channel {
    /// $43x0: direction bit 7, indirect bit 6, step bits 3-4, mode bits 0-2
    pub control: u8,
    /// $43x1: B-bus register, offset from $2100
    pub b_addr: u8,
    /// $43x2-$43x3
    pub a_addr: u16,
    /// $43x4
    pub a_bank: u8,
    /// $43x5-$43x6: GDMA byte count / HDMA indirect address
    pub count: u16,
    /// $43x7: bank of indirect HDMA data
    pub indirect_bank: u8,
    /// $43x8-$43x9: HDMA table cursor
    pub table_addr: u16,
    /// $43xA: remaining lines bits 0-6, repeat bit 7
    pub line_counter: u8,
    /// $43xB/$43xF: shared scratch byte with no function
    pub unused: u8,
    pub hdma_active: bool,
    pub repeat: bool,
    pub do_transfer: bool,
}

impl Channel {
    fn new() -> Channel {
        Channel {
            control: 0xFF,
            b_addr: 0xFF,
            a_addr: 0xFFFF,
            a_bank: 0xFF,
            count: 0xFFFF,
            indirect_bank: 0xFF,
            table_addr: 0xFFFF,
            line_counter: 0xFF,
            unused: 0xFF,
            hdma_active: false,
            repeat: false,
            do_transfer: false,
        }
    }

    fn indirect(&self) -> bool {
        self.control & 0x40 != 0
    }

    /// A-bus step per byte: fixed, incrementing or decrementing
    fn a_step(&self) -> i16 {
        if self.control & 0x08 != 0 {
            0
        } else if self.control & 0x10 != 0 {
            -1
        } else {
            1
        }
    }
}

/// The eight channels and their enable registers
pub struct Dma {
    pub channels: [Channel; 8],
    hdma_enabled: u8,
}

impl Dma {
    pub fn new() -> Dma {
        Dma {
            channels: std::array::from_fn(|_| Channel::new()),
            hdma_enabled: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Dma::new();
    }

    pub fn write_hdma_enable(&mut self, value: u8) {
        self.hdma_enabled = value;
    }

    pub fn hdma_enabled(&self) -> u8 {
        self.hdma_enabled
    }

    pub fn read(&self, addr: usize) -> Option<u8> {
        let channel = &self.channels[(addr >> 4) & 0x7];
        match addr & 0xF {
            0x0 => Some(channel.control),
            0x1 => Some(channel.b_addr),
            0x2 => Some(channel.a_addr as u8),
            0x3 => Some((channel.a_addr >> 8) as u8),
            0x4 => Some(channel.a_bank),
            0x5 => Some(channel.count as u8),
            0x6 => Some((channel.count >> 8) as u8),
            0x7 => Some(channel.indirect_bank),
            0x8 => Some(channel.table_addr as u8),
            0x9 => Some((channel.table_addr >> 8) as u8),
            0xA => Some(channel.line_counter),
            0xB | 0xF => Some(channel.unused),
            _ => None,
        }
    }

    pub fn write(&mut self, addr: usize, value: u8) {
        let channel = &mut self.channels[(addr >> 4) & 0x7];
        match addr & 0xF {
            0x0 => channel.control = value,
            0x1 => channel.b_addr = value,
            0x2 => channel.a_addr = (channel.a_addr & 0xFF00) | value as u16,
            0x3 => channel.a_addr = ((value as u16) << 8) | (channel.a_addr & 0x00FF),
            0x4 => channel.a_bank = value,
            0x5 => channel.count = (channel.count & 0xFF00) | value as u16,
            0x6 => channel.count = ((value as u16) << 8) | (channel.count & 0x00FF),
            0x7 => channel.indirect_bank = value,
            0x8 => channel.table_addr = (channel.table_addr & 0xFF00) | value as u16,
            0x9 => channel.table_addr = ((value as u16) << 8) | (channel.table_addr & 0x00FF),
            0xA => channel.line_counter = value,
            0xB | 0xF => channel.unused = value,
            _ => (),
        }
    }
}

impl Default for Dma {
    fn default() -> Self {
        Self::new()
    }
}

/// B-bus register visit order per transfer unit mode
fn unit_pattern(mode: u8) -> &'static [u8] {
    match mode & 0x7 {
        0 => &[0],
        1 => &[0, 1],
        2 => &[0, 0],
        3 => &[0, 0, 1, 1],
        4 => &[0, 1, 2, 3],
        5 => &[0, 1, 0, 1],
        6 => &[0, 0],
        _ => &[0, 0, 1, 1],
    }
}

fn a_bus_addr(bank: u8, offset: u16) -> u32 {
    ((bank as u32) << 16) | offset as u32
}

/// Runs every channel in `mask` to completion in channel order
///
/// The CPU is stalled for the returned number of master cycles. A zero
/// count transfers the full 64 KiB.
pub fn run_gdma(bus: &mut Bus, mask: u8) -> u32 {
    let mut cycles = 0;
    for index in 0..8 {
        if mask & (1 << index) == 0 {
            continue;
        }
        let (control, b_base) = {
            let channel = &bus.dma.channels[index];
            (channel.control, channel.b_addr)
        };
        let pattern = unit_pattern(control);
        let b_to_a = control & 0x80 != 0;

        'transfer: loop {
            for &offset in pattern {
                let (a_addr, a_bank, step) = {
                    let channel = &bus.dma.channels[index];
                    (channel.a_addr, channel.a_bank, channel.a_step())
                };
                let a = a_bus_addr(a_bank, a_addr);
                let b = 0x2100 | b_base.wrapping_add(offset) as u32;
                if b_to_a {
                    let value = bus.read8(b);
                    bus.write8(a, value);
                } else {
                    let value = bus.read8(a);
                    bus.write8(b, value);
                }
                cycles += GDMA_CYCLES_PER_BYTE;

                let channel = &mut bus.dma.channels[index];
                channel.a_addr = channel.a_addr.wrapping_add(step as u16);
                channel.count = channel.count.wrapping_sub(1);
                if channel.count == 0 {
                    break 'transfer;
                }
            }
        }
    }
    cycles
}

/// Latches the arming mask at the top of a frame and rewinds the tables
pub fn init_hdma_frame(bus: &mut Bus) {
    let mask = bus.dma.hdma_enabled();
    for index in 0..8 {
        let channel = &mut bus.dma.channels[index];
        channel.hdma_active = mask & (1 << index) != 0;
        if channel.hdma_active {
            channel.table_addr = channel.a_addr;
            channel.line_counter = 0;
            channel.repeat = false;
            channel.do_transfer = false;
        }
    }
}

/// Advances every active HDMA channel by one scanline
///
/// Returns the master cycles stolen from the CPU on this line.
pub fn run_hdma_line(bus: &mut Bus) -> u32 {
    let mut cycles = 0;
    for index in 0..8 {
        if !bus.dma.channels[index].hdma_active {
            continue;
        }

        // A spent line counter means the next table entry is due
        if bus.dma.channels[index].line_counter == 0 {
            let (bank, cursor) = {
                let channel = &bus.dma.channels[index];
                (channel.a_bank, channel.table_addr)
            };
            let header = bus.read8(a_bus_addr(bank, cursor));
            let channel = &mut bus.dma.channels[index];
            channel.table_addr = cursor.wrapping_add(1);
            if header == 0 {
                // Terminator: channel is done for this frame
                channel.hdma_active = false;
                continue;
            }
            channel.line_counter = header & 0x7F;
            channel.repeat = header & 0x80 != 0;
            channel.do_transfer = true;

            if bus.dma.channels[index].indirect() {
                let (bank, cursor) = {
                    let channel = &bus.dma.channels[index];
                    (channel.a_bank, channel.table_addr)
                };
                let low = bus.read8(a_bus_addr(bank, cursor));
                let high = bus.read8(a_bus_addr(bank, cursor.wrapping_add(1)));
                let channel = &mut bus.dma.channels[index];
                channel.table_addr = cursor.wrapping_add(2);
                channel.count = ((high as u16) << 8) | low as u16;
            }
        }

        if bus.dma.channels[index].do_transfer {
            let (control, b_base, indirect) = {
                let channel = &bus.dma.channels[index];
                (channel.control, channel.b_addr, channel.indirect())
            };
            let pattern = unit_pattern(control);
            let b_to_a = control & 0x80 != 0;
            for &offset in pattern {
                let source = {
                    let channel = &bus.dma.channels[index];
                    if indirect {
                        a_bus_addr(channel.indirect_bank, channel.count)
                    } else {
                        a_bus_addr(channel.a_bank, channel.table_addr)
                    }
                };
                let b = 0x2100 | b_base.wrapping_add(offset) as u32;
                if b_to_a {
                    let value = bus.read8(b);
                    bus.write8(source, value);
                } else {
                    let value = bus.read8(source);
                    bus.write8(b, value);
                }
                cycles += HDMA_CYCLES_PER_BYTE;

                let channel = &mut bus.dma.channels[index];
                if indirect {
                    channel.count = channel.count.wrapping_add(1);
                } else {
                    channel.table_addr = channel.table_addr.wrapping_add(1);
                }
            }
        }

        let channel = &mut bus.dma.channels[index];
        channel.line_counter = channel.line_counter.wrapping_sub(1);
        channel.do_transfer = channel.repeat;
    }
    cycles
}
