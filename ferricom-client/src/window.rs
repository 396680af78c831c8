use log::info;
use minifb::{Key, Window, WindowOptions};

use ferricom_core::joypad::button;
use ferricom_core::snes::Snes;

const WIDTH: usize = 256;
const HEIGHT: usize = 224;

/// Framebuffer window plus keyboard-to-pad mapping
pub struct EmuWindow {
    window: Window,
    scale: usize,
    pixels: Vec<u32>,
}

impl EmuWindow {
    pub fn new(title: &str, scale: usize) -> EmuWindow {
        let scale = scale.max(1);
        let window = Window::new(
            title,
            WIDTH * scale,
            HEIGHT * scale,
            WindowOptions::default(),
        )
        .expect("Opening window failed");
        EmuWindow {
            window,
            scale,
            pixels: vec![0; WIDTH * scale * HEIGHT * scale],
        }
    }

    /// Runs the emulator until the window closes or escape is pressed
    pub fn main_loop(&mut self, snes: &mut Snes) {
        self.window
            .limit_update_rate(Some(std::time::Duration::from_micros(16600)));
        while self.window.is_open() && !self.window.is_key_down(Key::Escape) {
            snes.set_buttons(self.pad_word());
            snes.emulate_frame();
            self.blit(snes.frame_buffer());
            self.window
                .update_with_buffer(&self.pixels, WIDTH * self.scale, HEIGHT * self.scale)
                .expect("Updating window failed");
        }
        info!("Window closed after {} frames", snes.frames());
    }

    fn pad_word(&self) -> u16 {
        let mut word = 0;
        let pairs = [
            (Key::Z, button::B),
            (Key::X, button::A),
            (Key::A, button::Y),
            (Key::S, button::X),
            (Key::Q, button::L),
            (Key::W, button::R),
            (Key::Enter, button::START),
            (Key::Backspace, button::SELECT),
            (Key::Up, button::UP),
            (Key::Down, button::DOWN),
            (Key::Left, button::LEFT),
            (Key::Right, button::RIGHT),
        ];
        for (key, bit) in pairs {
            if self.window.is_key_down(key) {
                word |= bit;
            }
        }
        word
    }

    /// Integer-scales the core's output into the window buffer
    fn blit(&mut self, frame: &[u32]) {
        let scale = self.scale;
        if scale == 1 {
            self.pixels.copy_from_slice(frame);
            return;
        }
        let out_width = WIDTH * scale;
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                let pixel = frame[y * WIDTH + x];
                let base = y * scale * out_width + x * scale;
                for dy in 0..scale {
                    let row = base + dy * out_width;
                    self.pixels[row..row + scale].fill(pixel);
                }
            }
        }
    }
}
