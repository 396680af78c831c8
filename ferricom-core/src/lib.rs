pub mod apu;
pub mod audio;
pub mod bus;
pub mod cartridge;
pub mod cheat;
pub mod cpu;
pub mod dma;
pub mod gsu;
pub mod joypad;
pub mod mmap;
pub mod mpydiv;
pub mod ppu;
pub mod savestate;
pub mod snes;

pub use cartridge::{Cartridge, CartridgeError};
pub use snes::Snes;
