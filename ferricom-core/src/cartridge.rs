use log::info;
use thiserror::Error;

/// Smallest image that can hold a header at $7FC0
const MIN_ROM_SIZE: usize = 0x8000;
/// Copier tools prepend this many bytes of junk
const COPIER_HEADER_SIZE: usize = 0x200;
const SRAM_MAX: usize = 128 * 1024;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("rom image too small ({0} bytes, need at least {MIN_ROM_SIZE})")]
    TooSmall(usize),
    #[error("no candidate header passed validation")]
    NoHeader,
    #[error("cartridge requires an unsupported accelerator (chipset ${0:02X})")]
    UnsupportedChipset(u8),
}

/// How rom offsets map into the 24bit bus address space
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MapMode {
    LoRom,
    HiRom,
    ExHiRom,
}

/// Extra silicon advertised by the chipset byte
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Chip {
    None,
    /// Fixed-point math coprocessor, detected but not clocked
    Math,
    /// The vector coprocessor, clocked in parallel with the CPU
    Risc,
}

/// Rom image with its battery-backed ram and mapping mode
pub struct Cartridge {
    rom: Box<[u8]>,
    sram: Box<[u8]>,
    map_mode: MapMode,
    chip: Chip,
    battery: bool,
    title: String,
}

/// Header offsets relative to the candidate base
mod header {
    pub const TITLE: usize = 0x00;
    pub const TITLE_LEN: usize = 21;
    pub const MAP_MODE: usize = 0x15;
    pub const CHIPSET: usize = 0x16;
    pub const ROM_SIZE: usize = 0x17;
    pub const RAM_SIZE: usize = 0x18;
    pub const COMPLEMENT: usize = 0x1C;
    pub const CHECKSUM: usize = 0x1E;
    pub const RESET_VECTOR: usize = 0x3C;
}

const CANDIDATES: [(usize, MapMode); 3] = [
    (0x7FC0, MapMode::LoRom),
    (0xFFC0, MapMode::HiRom),
    (0x40FFC0, MapMode::ExHiRom),
];

impl Cartridge {
    /// Parses `bytes` into a cartridge, stripping a copier header if present
    pub fn new(bytes: Vec<u8>) -> Result<Cartridge, CartridgeError> {
        let rom: Vec<u8> = if bytes.len() % MIN_ROM_SIZE == COPIER_HEADER_SIZE {
            info!("Stripping {} byte copier header", COPIER_HEADER_SIZE);
            bytes[COPIER_HEADER_SIZE..].to_vec()
        } else {
            bytes
        };
        if rom.len() < MIN_ROM_SIZE {
            return Err(CartridgeError::TooSmall(rom.len()));
        }

        let (base, map_mode) = CANDIDATES
            .iter()
            .filter(|(base, _)| base + 0x40 <= rom.len())
            .max_by_key(|(base, _)| score_header(&rom, *base))
            .filter(|(base, _)| score_header(&rom, *base) >= 0)
            .copied()
            .ok_or(CartridgeError::NoHeader)?;

        let chipset = rom[base + header::CHIPSET];
        let chip = match chipset {
            0x03..=0x05 => Chip::Math,
            0x13..=0x15 | 0x1A => Chip::Risc,
            0x34 | 0x35 => return Err(CartridgeError::UnsupportedChipset(chipset)),
            _ => Chip::None,
        };
        let battery = chipset & 0x02 != 0;

        let ram_size_exp = rom[base + header::RAM_SIZE];
        let sram_size = if ram_size_exp == 0 {
            0
        } else {
            (1024usize << ram_size_exp).min(SRAM_MAX)
        };

        let title = rom[base + header::TITLE..base + header::TITLE + header::TITLE_LEN]
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { ' ' })
            .collect::<String>()
            .trim_end()
            .to_string();
        info!(
            "Cartridge '{}': {:?}, {} KiB rom, {} KiB sram, chip {:?}",
            title,
            map_mode,
            rom.len() / 1024,
            sram_size / 1024,
            chip
        );

        Ok(Cartridge {
            rom: rom.into_boxed_slice(),
            sram: vec![0; sram_size].into_boxed_slice(),
            map_mode,
            chip,
            battery,
            title,
        })
    }

    pub fn map_mode(&self) -> MapMode {
        self.map_mode
    }

    pub fn chip(&self) -> Chip {
        self.chip
    }

    pub fn has_battery(&self) -> bool {
        self.battery
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    /// Flat battery ram contents for host persistence
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    /// Restores battery ram saved by the host, clamped to the mapped size
    pub fn load_sram(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.sram.len());
        self.sram[..n].copy_from_slice(&bytes[..n]);
    }

    /// Reads rom relative to its linear start, mirrored modulo rom length
    pub fn read_rom(&self, offset: usize) -> u8 {
        self.rom[offset % self.rom.len()]
    }

    /// Resolves a bus address to this cartridge and reads it
    ///
    /// Returns `None` for addresses the mapping leaves open.
    pub fn read(&self, bank: usize, offset: usize) -> Option<u8> {
        match self.map_mode {
            MapMode::LoRom => {
                if offset >= 0x8000 {
                    Some(self.read_rom((bank & 0x7F) * 0x8000 + (offset - 0x8000)))
                } else if !self.sram.is_empty()
                    && ((0x70..=0x7D).contains(&(bank & 0x7F)) || bank >= 0xFE)
                {
                    let index = ((bank & 0x0F) * 0x10000 + offset) % self.sram.len();
                    Some(self.sram[index])
                } else {
                    None
                }
            }
            MapMode::HiRom => {
                if (0x40..=0x7D).contains(&(bank & 0x7F)) || bank >= 0xC0 {
                    Some(self.read_rom((bank & 0x3F) * 0x10000 + offset))
                } else if offset >= 0x8000 {
                    // Upper halves of the system banks alias the rom
                    Some(self.read_rom((bank & 0x3F) * 0x10000 + offset))
                } else if !self.sram.is_empty()
                    && (0x20..=0x3F).contains(&(bank & 0x7F))
                    && (0x6000..=0x7FFF).contains(&offset)
                {
                    let index = ((bank & 0x1F) * 0x2000 + (offset - 0x6000)) % self.sram.len();
                    Some(self.sram[index])
                } else {
                    None
                }
            }
            MapMode::ExHiRom => {
                // The upper 4 MiB sits in banks $C0-$FF, the extension below it
                if (0x40..=0x7D).contains(&(bank & 0x7F)) || bank >= 0xC0 {
                    let half = if bank >= 0xC0 { 0 } else { 0x40_0000 };
                    Some(self.read_rom(half + (bank & 0x3F) * 0x10000 + offset))
                } else if offset >= 0x8000 {
                    let half = if bank >= 0x80 { 0 } else { 0x40_0000 };
                    Some(self.read_rom(half + (bank & 0x3F) * 0x10000 + offset))
                } else if !self.sram.is_empty()
                    && (0x20..=0x3F).contains(&(bank & 0x7F))
                    && (0x6000..=0x7FFF).contains(&offset)
                {
                    let index = ((bank & 0x1F) * 0x2000 + (offset - 0x6000)) % self.sram.len();
                    Some(self.sram[index])
                } else {
                    None
                }
            }
        }
    }

    /// Writes through the mapping; rom targets are no-ops, battery ram mutates
    ///
    /// Returns `true` if the address belonged to this cartridge.
    pub fn write(&mut self, bank: usize, offset: usize, value: u8) -> bool {
        match self.map_mode {
            MapMode::LoRom => {
                if offset >= 0x8000 {
                    true // rom, dropped
                } else if !self.sram.is_empty()
                    && ((0x70..=0x7D).contains(&(bank & 0x7F)) || bank >= 0xFE)
                {
                    let index = ((bank & 0x0F) * 0x10000 + offset) % self.sram.len();
                    self.sram[index] = value;
                    true
                } else {
                    false
                }
            }
            MapMode::HiRom | MapMode::ExHiRom => {
                if !self.sram.is_empty()
                    && (0x20..=0x3F).contains(&(bank & 0x7F))
                    && (0x6000..=0x7FFF).contains(&offset)
                {
                    let index = ((bank & 0x1F) * 0x2000 + (offset - 0x6000)) % self.sram.len();
                    self.sram[index] = value;
                    true
                } else {
                    // Linear rom banks swallow the write
                    (0x40..=0x7D).contains(&(bank & 0x7F)) || bank >= 0xC0 || offset >= 0x8000
                }
            }
        }
    }
}

/// Scores a header candidate, negative means disqualified
///
/// The reset vector must point into the upper bank half; a matching
/// checksum/complement pair is worth the most, a known map-mode byte and a
/// plausible rom-size byte a little, a fully printable title one more.
fn score_header(rom: &[u8], base: usize) -> i32 {
    let reset = rom[base + header::RESET_VECTOR] as u16
        | ((rom[base + header::RESET_VECTOR + 1] as u16) << 8);
    if reset < 0x8000 {
        return -1;
    }
    let mut score = 0;
    let checksum =
        rom[base + header::CHECKSUM] as u16 | ((rom[base + header::CHECKSUM + 1] as u16) << 8);
    let complement =
        rom[base + header::COMPLEMENT] as u16 | ((rom[base + header::COMPLEMENT + 1] as u16) << 8);
    if checksum.wrapping_add(complement) == 0xFFFF {
        score += 10;
    }
    if matches!(rom[base + header::MAP_MODE], 0x20 | 0x21 | 0x23 | 0x30 | 0x31 | 0x35) {
        score += 2;
    }
    if (0x08..=0x0D).contains(&rom[base + header::ROM_SIZE]) {
        score += 1;
    }
    if rom[base..base + header::TITLE_LEN]
        .iter()
        .all(|&b| (0x20..0x7F).contains(&b))
    {
        score += 1;
    }
    score
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Builds a 64 KiB LoRom image with a valid header and reset vector
    pub fn lorom_image() -> Vec<u8> {
        let mut rom = vec![0; 0x10000];
        let base = 0x7FC0;
        rom[base..base + 21].copy_from_slice(b"TEST CART            ");
        rom[base + header::MAP_MODE] = 0x20;
        rom[base + header::CHIPSET] = 0x02;
        rom[base + header::ROM_SIZE] = 0x08;
        rom[base + header::RAM_SIZE] = 0x03; // 8 KiB
        rom[base + header::CHECKSUM] = 0x34;
        rom[base + header::CHECKSUM + 1] = 0x12;
        rom[base + header::COMPLEMENT] = 0xCB;
        rom[base + header::COMPLEMENT + 1] = 0xED;
        rom[base + header::RESET_VECTOR] = 0x00;
        rom[base + header::RESET_VECTOR + 1] = 0x80;
        rom
    }

    #[test]
    fn lorom_header_detected() {
        let cart = Cartridge::new(lorom_image()).unwrap();
        assert_eq!(MapMode::LoRom, cart.map_mode());
        assert_eq!("TEST CART", cart.title());
        assert!(cart.has_battery());
        assert_eq!(8 * 1024, cart.sram().len());
    }

    #[test]
    fn copier_header_stripped() {
        let mut bytes = vec![0xEE; COPIER_HEADER_SIZE];
        bytes.extend(lorom_image());
        let cart = Cartridge::new(bytes).unwrap();
        assert_eq!(MapMode::LoRom, cart.map_mode());
    }

    #[test]
    fn checksum_required_for_high_score() {
        let mut rom = lorom_image();
        let base = 0x7FC0;
        rom[base + header::CHECKSUM] = 0x00;
        // Reset vector still valid so the header is admitted on the low score
        assert!(score_header(&rom, base) < 10);
        assert!(score_header(&lorom_image(), base) >= 10);
    }

    #[test]
    fn reset_vector_disqualifies() {
        let mut rom = lorom_image();
        rom[0x7FC0 + header::RESET_VECTOR + 1] = 0x00;
        assert!(Cartridge::new(rom).is_err());
    }

    #[test]
    fn lorom_reads_mirror() {
        let mut bytes = lorom_image();
        bytes[0x0000] = 0xAB;
        bytes[0x8000] = 0xCD;
        let cart = Cartridge::new(bytes).unwrap();
        assert_eq!(Some(0xAB), cart.read(0x00, 0x8000));
        assert_eq!(Some(0xCD), cart.read(0x01, 0x8000));
        // 64 KiB image mirrors every two lorom banks
        assert_eq!(Some(0xAB), cart.read(0x02, 0x8000));
        assert_eq!(Some(0xAB), cart.read(0x80, 0x8000));
    }

    #[test]
    fn sram_roundtrip_and_mirroring() {
        let mut cart = Cartridge::new(lorom_image()).unwrap();
        assert!(cart.write(0x70, 0x0010, 0x5A));
        assert_eq!(Some(0x5A), cart.read(0x70, 0x0010));
        // 8 KiB window mirrors
        assert_eq!(Some(0x5A), cart.read(0x70, 0x2010));

        // Rom writes are dropped
        let before = cart.read(0x00, 0x8000);
        assert!(cart.write(0x00, 0x8000, 0x99));
        assert_eq!(before, cart.read(0x00, 0x8000));
    }

    #[test]
    fn risc_chip_detected() {
        let mut rom = lorom_image();
        rom[0x7FC0 + header::CHIPSET] = 0x13;
        assert_eq!(Chip::Risc, Cartridge::new(rom).unwrap().chip());

        let mut rom = lorom_image();
        rom[0x7FC0 + header::CHIPSET] = 0x34;
        assert!(matches!(
            Cartridge::new(rom),
            Err(CartridgeError::UnsupportedChipset(0x34))
        ));
    }
}
