use thiserror::Error;

use crate::snes::Snes;

/// Section order of a snapshot; every integer inside is little-endian
const TAGS: [&[u8; 4]; 5] = [b"CPU ", b"BUS ", b"PPU ", b"APU ", b"DSP "];

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("expected section '{expected}', found '{found}'")]
    TagMismatch { expected: String, found: String },
    #[error("snapshot ends inside a section header")]
    TruncatedHeader,
}

/// Little-endian byte sink for subsystem dumps
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    fn new() -> StateWriter {
        StateWriter { buf: Vec::new() }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Bounded little-endian reader that zero-fills past the end, so truncated
/// sections load as zeroed state instead of failing
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    fn new(data: &'a [u8]) -> StateReader<'a> {
        StateReader { data, pos: 0 }
    }

    pub fn take_u8(&mut self) -> u8 {
        let value = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        value
    }

    pub fn take_bool(&mut self) -> bool {
        self.take_u8() != 0
    }

    pub fn take_u16(&mut self) -> u16 {
        self.take_u8() as u16 | ((self.take_u8() as u16) << 8)
    }

    pub fn take_u32(&mut self) -> u32 {
        self.take_u16() as u32 | ((self.take_u16() as u32) << 16)
    }

    pub fn take_bytes(&mut self, out: &mut [u8]) {
        for byte in out.iter_mut() {
            *byte = self.take_u8();
        }
    }
}

/// Serializes the whole engine into a tagged snapshot
pub fn save(snes: &Snes) -> Vec<u8> {
    let mut out = Vec::new();
    for &tag in &TAGS {
        let mut writer = StateWriter::new();
        match tag {
            b"CPU " => snes.cpu.save_state(&mut writer),
            b"BUS " => snes.bus.save_state(&mut writer),
            b"PPU " => {
                snes.bus.ppu.save_state(&mut writer);
                snes.ppu.save_state(&mut writer);
            }
            b"APU " => {
                snes.apu.save_state(&mut writer);
                snes.bus.mailbox.save_state(&mut writer);
            }
            _ => snes.apu.mem.dsp.save_state(&mut writer),
        }
        out.extend_from_slice(tag);
        out.extend_from_slice(&(writer.buf.len() as u32).to_le_bytes());
        out.extend_from_slice(&writer.buf);
    }
    out
}

/// Restores a snapshot produced by [`save`]
///
/// Structural errors are caught before any engine state is touched; a
/// payload cut short merely zero-fills its tail.
pub fn load(snes: &mut Snes, bytes: &[u8]) -> Result<(), SaveStateError> {
    let mut sections = Vec::new();
    let mut cursor = 0;
    for &tag in &TAGS {
        if cursor + 8 > bytes.len() {
            return Err(SaveStateError::TruncatedHeader);
        }
        let found = &bytes[cursor..cursor + 4];
        if found != tag {
            return Err(SaveStateError::TagMismatch {
                expected: String::from_utf8_lossy(tag).into_owned(),
                found: String::from_utf8_lossy(found).into_owned(),
            });
        }
        let length = u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
        let start = cursor + 8;
        let end = (start + length).min(bytes.len());
        sections.push(&bytes[start..end]);
        cursor = start + length;
    }

    snes.cpu.load_state(&mut StateReader::new(sections[0]));
    snes.bus.load_state(&mut StateReader::new(sections[1]));
    let mut ppu = StateReader::new(sections[2]);
    snes.bus.ppu.load_state(&mut ppu);
    snes.ppu.load_state(&mut ppu);
    let mut apu = StateReader::new(sections[3]);
    snes.apu.load_state(&mut apu);
    snes.bus.mailbox.load_state(&mut apu);
    snes.apu.mem.dsp.load_state(&mut StateReader::new(sections[4]));
    Ok(())
}
