pub mod cgram;
pub mod io;
pub mod oam;
pub mod vram;

pub use cgram::Cgram;
pub use io::PpuIo;
pub use oam::Oam;
pub use vram::Vram;

use crate::mmap;

pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 224;
/// First scanline of the vertical blanking period
pub const VBLANK_LINE: u16 = 225;
/// Scanlines per frame
pub const LINE_COUNT: u16 = 262;

/// The PPU memories and registers reachable from the bus at `$2100-$213F`
pub struct Ports {
    pub io: PpuIo,
    pub vram: Vram,
    pub cgram: Cgram,
    pub oam: Oam,
    /// H/V counter latches for OPHCT/OPVCT
    latched_h: u16,
    latched_v: u16,
    ophct_high: bool,
    opvct_high: bool,
}

impl Ports {
    pub fn new() -> Ports {
        Ports {
            io: PpuIo::new(),
            vram: Vram::default(),
            cgram: Cgram::default(),
            oam: Oam::default(),
            latched_h: 0,
            latched_v: 0,
            ophct_high: false,
            opvct_high: false,
        }
    }

    /// Reads a PPU register, `None` falls through to open bus
    pub fn read(&mut self, addr: usize) -> Option<u8> {
        match addr {
            mmap::MPYL => Some(self.io.product_byte(0)),
            mmap::MPYM => Some(self.io.product_byte(1)),
            mmap::MPYH => Some(self.io.product_byte(2)),
            mmap::SLHV => {
                self.ophct_high = false;
                self.opvct_high = false;
                None
            }
            mmap::RDOAM => Some(self.oam.read_data()),
            mmap::RDVRAML => Some(self.vram.read_data_low()),
            mmap::RDVRAMH => Some(self.vram.read_data_high()),
            mmap::RDCGRAM => Some(self.cgram.read_data()),
            mmap::OPHCT => {
                let value = if self.ophct_high {
                    (self.latched_h >> 8) as u8
                } else {
                    self.latched_h as u8
                };
                self.ophct_high = !self.ophct_high;
                Some(value)
            }
            mmap::OPVCT => {
                let value = if self.opvct_high {
                    (self.latched_v >> 8) as u8
                } else {
                    self.latched_v as u8
                };
                self.opvct_high = !self.opvct_high;
                Some(value)
            }
            mmap::STAT77 => Some(0x01),
            mmap::STAT78 => Some(0x01),
            _ => None,
        }
    }

    pub fn write(&mut self, addr: usize, value: u8) {
        let io = &mut self.io;
        match addr {
            mmap::INIDISP => io.ini_disp = value,
            mmap::OBSEL => io.ob_sel = value,
            mmap::OAMADDL => self.oam.write_addr_low(value),
            mmap::OAMADDH => self.oam.write_addr_high(value),
            mmap::OAMDATA => self.oam.write_data(value),
            mmap::BGMODE => io.bg_mode = value,
            mmap::MOSAIC => io.mosaic = value,
            mmap::BG1SC..=mmap::BG4SC => io.bg_sc[addr - mmap::BG1SC] = value,
            mmap::BG12NBA => io.bg_nba[0] = value,
            mmap::BG34NBA => io.bg_nba[1] = value,
            mmap::BG1HOFS => io.write_scroll_h(0, value),
            mmap::BG1VOFS => io.write_scroll_v(0, value),
            mmap::BG2HOFS => io.write_scroll_h(1, value),
            mmap::BG2VOFS => io.write_scroll_v(1, value),
            mmap::BG3HOFS => io.write_scroll_h(2, value),
            mmap::BG3VOFS => io.write_scroll_v(2, value),
            mmap::BG4HOFS => io.write_scroll_h(3, value),
            mmap::BG4VOFS => io.write_scroll_v(3, value),
            mmap::VMAIN => self.vram.write_control(value),
            mmap::VMADDL => self.vram.write_addr_low(value),
            mmap::VMADDH => self.vram.write_addr_high(value),
            mmap::VMDATAL => self.vram.write_data_low(value),
            mmap::VMDATAH => self.vram.write_data_high(value),
            mmap::M7SEL => io.m7_sel = value,
            mmap::M7A..=mmap::M7Y => io.write_m7(addr - mmap::M7A, value),
            mmap::CGADD => self.cgram.write_addr(value),
            mmap::CGDATA => self.cgram.write_data(value),
            mmap::W12SEL => io.w12_sel = value,
            mmap::W34SEL => io.w34_sel = value,
            mmap::WOBJSEL => io.wobj_sel = value,
            mmap::WH0..=mmap::WH3 => io.wh[addr - mmap::WH0] = value,
            mmap::WBGLOG => io.wbg_log = value,
            mmap::WOBJLOG => io.wobj_log = value,
            mmap::TM => io.tm = value,
            mmap::TS => io.ts = value,
            mmap::TMW => io.tmw = value,
            mmap::TSW => io.tsw = value,
            mmap::CGWSEL => io.cg_wsel = value,
            mmap::CGADSUB => io.cg_adsub = value,
            mmap::COLDATA => io.write_fixed_color(value),
            mmap::SETINI => io.set_ini = value,
            _ => (),
        }
    }

    pub fn latch_counters(&mut self, h: u16, v: u16) {
        self.latched_h = h;
        self.latched_v = v;
    }
}

impl Default for Ports {
    fn default() -> Self {
        Self::new()
    }
}

/// What a scanline step produced for the scheduler
#[derive(PartialEq, Eq, Debug)]
pub enum LineEvent {
    None,
    /// Line 225 reached, NMI may fire
    EnterVblank,
    /// Frame wrapped, the framebuffer is complete
    FrameDone,
}

/// Layer indices shared by enable masks and color math selects
const BG1: u8 = 0;
const BG2: u8 = 1;
const BG3: u8 = 2;
const BG4: u8 = 3;
const OBJ: u8 = 4;
const BACKDROP: u8 = 5;

/// One composed pixel awaiting color math
#[derive(Clone, Copy)]
struct Composed {
    color: u16,
    /// Participates in color math per CGADSUB and the OBJ palette rule
    math: bool,
    backdrop: bool,
}

/// Scanline compositor and frame state machine
pub struct Ppu {
    line: u16,
    vblank: bool,
    frame: Box<[u32]>,
    /// Topmost sprite pixel per priority for the current line
    obj_color: [u16; SCREEN_WIDTH],
    obj_prio: [u8; SCREEN_WIDTH],
    /// Palettes 4-7 take part in color math, 0-3 are exempt
    obj_math: [bool; SCREEN_WIDTH],
    main: [Composed; SCREEN_WIDTH],
    sub: [Composed; SCREEN_WIDTH],
}

impl Ppu {
    pub fn new() -> Ppu {
        let back = Composed {
            color: 0,
            math: false,
            backdrop: true,
        };
        Ppu {
            line: 0,
            vblank: false,
            frame: vec![0; SCREEN_WIDTH * SCREEN_HEIGHT].into_boxed_slice(),
            obj_color: [0; SCREEN_WIDTH],
            obj_prio: [0xFF; SCREEN_WIDTH],
            obj_math: [false; SCREEN_WIDTH],
            main: [back; SCREEN_WIDTH],
            sub: [back; SCREEN_WIDTH],
        }
    }

    pub fn reset(&mut self) {
        self.line = 0;
        self.vblank = false;
        self.frame.fill(0);
    }

    pub fn line(&self) -> u16 {
        self.line
    }

    pub fn in_vblank(&self) -> bool {
        self.vblank
    }

    pub fn frame_buffer(&self) -> &[u32] {
        &self.frame
    }

    /// Renders the current line if visible and advances to the next one
    pub fn step_scanline(&mut self, ports: &mut Ports) -> LineEvent {
        if self.line < SCREEN_HEIGHT as u16 {
            ports.latch_counters(0, self.line);
            self.render_scanline(ports);
        }
        self.line += 1;
        match self.line {
            VBLANK_LINE => {
                self.vblank = true;
                LineEvent::EnterVblank
            }
            LINE_COUNT => {
                self.line = 0;
                self.vblank = false;
                LineEvent::FrameDone
            }
            _ => LineEvent::None,
        }
    }

    fn render_scanline(&mut self, ports: &Ports) {
        let line = self.line as usize;
        if ports.io.force_blank() {
            self.frame[line * SCREEN_WIDTH..(line + 1) * SCREEN_WIDTH].fill(0xFF000000);
            return;
        }

        let io = &ports.io;
        let backdrop = Composed {
            color: ports.cgram.color(0),
            math: io.cg_adsub & (1 << BACKDROP) != 0,
            backdrop: true,
        };
        self.main.fill(backdrop);
        self.sub.fill(backdrop);
        self.evaluate_sprites(ports, self.line);

        let mode = io.bg_mode_bits();
        for &(layer, priority) in layer_order(mode, io.bg_mode & 0x08 != 0) {
            if layer == OBJ {
                self.paint_objects(ports, priority);
            } else if mode == 7 {
                self.paint_mode7(ports, self.line);
            } else if let Some(bpp) = layer_bpp(mode, layer) {
                self.paint_background(ports, self.line, layer, bpp, priority != 0);
            }
        }

        // Resolve color math and brightness into the framebuffer
        let brightness = io.brightness() as u32;
        let fixed = io.fixed_color[0] as u16
            | ((io.fixed_color[1] as u16) << 5)
            | ((io.fixed_color[2] as u16) << 10);
        for x in 0..SCREEN_WIDTH {
            let main = self.main[x];
            let inside = self.color_window(io, x);
            let force_black = match io.cg_wsel >> 6 {
                0 => false,
                1 => !inside,
                2 => inside,
                _ => true,
            };
            let math_allowed = match (io.cg_wsel >> 4) & 0x3 {
                0 => true,
                1 => inside,
                2 => !inside,
                _ => false,
            };

            let mut color = if force_black { 0 } else { main.color };
            if math_allowed && main.math {
                let use_subscreen = io.cg_wsel & 0x02 != 0;
                let sub = self.sub[x];
                let sub_color = if use_subscreen && !sub.backdrop {
                    sub.color
                } else {
                    fixed
                };
                // Half is suppressed when the main pixel was clipped black
                let half = io.cg_adsub & 0x40 != 0 && !force_black;
                color = color_math(color, sub_color, io.cg_adsub & 0x80 != 0, half);
            }

            self.frame[line * SCREEN_WIDTH + x] = to_argb(color, brightness);
        }
    }

    /// Collects the topmost sprite pixel of each priority for this line
    fn evaluate_sprites(&mut self, ports: &Ports, line: u16) {
        self.obj_color.fill(0);
        self.obj_prio.fill(0xFF);
        self.obj_math.fill(false);

        let io = &ports.io;
        let oam = &ports.oam;
        let (small, large) = object_sizes(io.ob_sel >> 5);
        let name_base = ((io.ob_sel & 0x07) as u16) << 13;
        let name_gap = (((io.ob_sel >> 3) & 0x03) as u16) << 12;

        // Later entries lie behind earlier ones, so walk them in reverse
        for index in (0..128).rev() {
            let entry = &oam.bytes()[index * 4..index * 4 + 4];
            let high = oam.bytes()[0x200 + index / 4] >> ((index % 4) * 2);
            let size = if high & 0x02 != 0 { large } else { small };
            let x = entry[0] as i32 - (((high & 0x01) as i32) << 8);
            let y = entry[1] as u16;

            let row = line.wrapping_sub(y) & 0xFF;
            if row >= size {
                continue;
            }
            let attr = entry[3];
            let row = if attr & 0x80 != 0 { size - 1 - row } else { row };
            let palette = ((attr >> 1) & 0x07) as u16;
            let priority = (attr >> 4) & 0x03;
            let tile = (entry[2] as u16 | (((attr & 0x01) as u16) << 8))
                .wrapping_add((row / 8) << 4);

            for px in 0..size {
                let screen_x = x + px as i32;
                if !(0..SCREEN_WIDTH as i32).contains(&screen_x) {
                    continue;
                }
                let col = if attr & 0x40 != 0 { size - 1 - px } else { px };
                // Wide sprites step through the row of the name table
                let cell = ((tile & !0x0F) | (tile.wrapping_add(col / 8) & 0x0F)) & 0x1FF;
                let chr_base = name_base
                    .wrapping_add(if cell >= 0x100 { name_gap } else { 0 })
                    .wrapping_add(cell * 16);
                let index4 = tile_pixel_4bpp(&ports.vram, chr_base, col % 8, row % 8);
                if index4 == 0 {
                    continue;
                }
                let sx = screen_x as usize;
                self.obj_color[sx] = ports.cgram.color((128 + palette * 16 + index4 as u16) as u8);
                self.obj_prio[sx] = priority;
                self.obj_math[sx] = palette >= 4;
            }
        }
    }

    fn paint_objects(&mut self, ports: &Ports, priority: u8) {
        let io = &ports.io;
        for x in 0..SCREEN_WIDTH {
            if self.obj_prio[x] != priority {
                continue;
            }
            let pixel = Composed {
                color: self.obj_color[x],
                math: self.obj_math[x] && io.cg_adsub & (1 << OBJ) != 0,
                backdrop: false,
            };
            if io.tm & (1 << OBJ) != 0 && !self.window_masks(io, OBJ, x, io.tmw) {
                self.main[x] = pixel;
            }
            if io.ts & (1 << OBJ) != 0 && !self.window_masks(io, OBJ, x, io.tsw) {
                self.sub[x] = pixel;
            }
        }
    }

    fn paint_background(&mut self, ports: &Ports, line: u16, bg: u8, bpp: u8, priority: bool) {
        let io = &ports.io;
        let bg_index = bg as usize;
        let on_main = io.tm & (1 << bg) != 0;
        let on_sub = io.ts & (1 << bg) != 0;
        if !on_main && !on_sub {
            return;
        }

        let sc = io.bg_sc[bg_index];
        let map_base = ((sc as u16) >> 2) << 10;
        let wide = sc & 0x01 != 0;
        let tall = sc & 0x02 != 0;
        let chr_base = if bg_index < 2 {
            ((io.bg_nba[0] as u16 >> (4 * bg_index)) & 0x0F) << 12
        } else {
            ((io.bg_nba[1] as u16 >> (4 * (bg_index - 2))) & 0x0F) << 12
        };
        let mosaic = if io.mosaic & (1 << bg) != 0 {
            io.mosaic_size()
        } else {
            1
        };
        // Palette group stride; mode 0 also offsets whole backgrounds
        let (palette_step, palette_base) = match bpp {
            2 => (4u16, if io.bg_mode_bits() == 0 { bg as u16 * 32 } else { 0 }),
            4 => (16, 0),
            _ => (0, 0),
        };
        let math = io.cg_adsub & (1 << bg) != 0;

        let sample_y = line - line % mosaic;
        let vofs = io.bg_vofs[bg_index];
        let hofs = io.bg_hofs[bg_index];
        for x in 0..SCREEN_WIDTH {
            // Mosaic snaps the sampled source coordinate, not the output
            let sample_x = (x as u16) - (x as u16) % mosaic;
            let sx = sample_x.wrapping_add(hofs) & 0x3FF;
            let sy = sample_y.wrapping_add(vofs) & 0x3FF;
            let entry = tilemap_entry(&ports.vram, map_base, wide, tall, sx / 8, sy / 8);
            if (entry & 0x2000 != 0) != priority {
                continue;
            }
            let tile = entry & 0x3FF;
            let palette = (entry >> 10) & 0x07;
            let col = if entry & 0x4000 != 0 { 7 - sx % 8 } else { sx % 8 };
            let fine_y = if entry & 0x8000 != 0 { 7 - sy % 8 } else { sy % 8 };
            let color_index = match bpp {
                2 => tile_pixel_2bpp(&ports.vram, chr_base.wrapping_add(tile * 8), col, fine_y),
                4 => tile_pixel_4bpp(&ports.vram, chr_base.wrapping_add(tile * 16), col, fine_y),
                _ => tile_pixel_8bpp(&ports.vram, chr_base.wrapping_add(tile * 32), col, fine_y),
            };
            if color_index == 0 {
                continue;
            }
            let color = ports
                .cgram
                .color((palette_base + palette * palette_step + color_index as u16) as u8);
            let pixel = Composed {
                color,
                math,
                backdrop: false,
            };
            if on_main && !self.window_masks(io, bg, x, io.tmw) {
                self.main[x] = pixel;
            }
            if on_sub && !self.window_masks(io, bg, x, io.tsw) {
                self.sub[x] = pixel;
            }
        }
    }

    fn paint_mode7(&mut self, ports: &Ports, line: u16) {
        let io = &ports.io;
        if io.tm & 0x01 == 0 && io.ts & 0x01 == 0 {
            return;
        }
        let a = io.m7_a as i32;
        let b = io.m7_b as i32;
        let c = io.m7_c as i32;
        let d = io.m7_d as i32;
        let cx = io.m7_x as i32;
        let cy = io.m7_y as i32;
        let hofs = (((io.bg_hofs[0] as i16) << 3) >> 3) as i32;
        let vofs = (((io.bg_vofs[0] as i16) << 3) >> 3) as i32;
        let flip_x = io.m7_sel & 0x01 != 0;
        let flip_y = io.m7_sel & 0x02 != 0;
        let screen_over = io.m7_sel >> 6;
        let math = io.cg_adsub & (1 << BG1) != 0;

        let sy = if flip_y { 255 - line as i32 } else { line as i32 };
        for x in 0..SCREEN_WIDTH {
            let sx = if flip_x { 255 - x as i32 } else { x as i32 };
            let ox = sx + hofs - cx;
            let oy = sy + vofs - cy;
            let fx = ((a * ox + b * oy) >> 8) + cx;
            let fy = ((c * ox + d * oy) >> 8) + cy;
            let out_of_field = !(0..1024).contains(&fx) || !(0..1024).contains(&fy);
            let tile = if !out_of_field || screen_over < 2 {
                // In the field, or wrapping around it
                let cell = ((fy as u16 & 0x3FF) / 8) * 128 + (fx as u16 & 0x3FF) / 8;
                ports.vram.word(cell) & 0x00FF
            } else if screen_over == 3 {
                // Repeat character 0 outside
                0
            } else {
                continue;
            };
            let (px, py) = ((fx & 0x7) as u16, (fy & 0x7) as u16);
            let pixel_word = ports.vram.word(tile * 64 + py * 8 + px);
            let color_index = (pixel_word >> 8) as u8;
            if color_index == 0 {
                continue;
            }
            let pixel = Composed {
                color: ports.cgram.color(color_index),
                math,
                backdrop: false,
            };
            if io.tm & 0x01 != 0 && !self.window_masks(io, BG1, x, io.tmw) {
                self.main[x] = pixel;
            }
            if io.ts & 0x01 != 0 && !self.window_masks(io, BG1, x, io.tsw) {
                self.sub[x] = pixel;
            }
        }
    }

    /// Whether window masking hides `layer` at `x` on a screen whose mask
    /// enables are `mask_enable`
    fn window_masks(&self, io: &PpuIo, layer: u8, x: usize, mask_enable: u8) -> bool {
        if mask_enable & (1 << layer) == 0 {
            return false;
        }
        self.window_active(io, layer, x)
    }

    /// Combined two-window membership for a layer
    fn window_active(&self, io: &PpuIo, layer: u8, x: usize) -> bool {
        let sel = match layer {
            BG1 | BG2 => io.w12_sel >> (4 * layer),
            BG3 | BG4 => io.w34_sel >> (4 * (layer - 2)),
            _ => io.wobj_sel,
        };
        let logic = if layer == OBJ {
            io.wobj_log & 0x03
        } else {
            (io.wbg_log >> (2 * layer)) & 0x03
        };
        combine_windows(io, sel, logic, x)
    }

    /// The color window gates math and clip-to-black
    fn color_window(&self, io: &PpuIo, x: usize) -> bool {
        let sel = io.wobj_sel >> 4;
        let logic = (io.wobj_log >> 2) & 0x03;
        combine_windows(io, sel, logic, x)
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the two-window enable/invert selects and the combine logic
fn combine_windows(io: &PpuIo, sel: u8, logic: u8, x: usize) -> bool {
    let x = x as u8;
    let w1_enabled = sel & 0x02 != 0;
    let w2_enabled = sel & 0x08 != 0;
    let mut w1 = x >= io.wh[0] && x <= io.wh[1];
    if sel & 0x01 != 0 {
        w1 = !w1;
    }
    let mut w2 = x >= io.wh[2] && x <= io.wh[3];
    if sel & 0x04 != 0 {
        w2 = !w2;
    }
    match (w1_enabled, w2_enabled) {
        (false, false) => false,
        (true, false) => w1,
        (false, true) => w2,
        (true, true) => match logic {
            0 => w1 | w2,
            1 => w1 & w2,
            2 => w1 ^ w2,
            _ => !(w1 ^ w2),
        },
    }
}

/// Back-to-front paint order of (layer, priority) pairs per mode
fn layer_order(mode: u8, bg3_priority: bool) -> &'static [(u8, u8)] {
    const MODE0: [(u8, u8); 12] = [
        (BG4, 0), (BG3, 0), (OBJ, 0), (BG4, 1), (BG3, 1), (OBJ, 1),
        (BG2, 0), (BG1, 0), (OBJ, 2), (BG2, 1), (BG1, 1), (OBJ, 3),
    ];
    const MODE1: [(u8, u8); 10] = [
        (BG3, 0), (OBJ, 0), (BG3, 1), (OBJ, 1),
        (BG2, 0), (BG1, 0), (OBJ, 2), (BG2, 1), (BG1, 1), (OBJ, 3),
    ];
    const MODE1_BG3_TOP: [(u8, u8); 10] = [
        (BG3, 0), (OBJ, 0), (OBJ, 1),
        (BG2, 0), (BG1, 0), (OBJ, 2), (BG2, 1), (BG1, 1), (OBJ, 3), (BG3, 1),
    ];
    const MODE2345: [(u8, u8); 8] = [
        (BG2, 0), (OBJ, 0), (BG1, 0), (OBJ, 1), (BG2, 1), (OBJ, 2), (BG1, 1), (OBJ, 3),
    ];
    const MODE6: [(u8, u8); 6] = [(OBJ, 0), (BG1, 0), (OBJ, 1), (OBJ, 2), (BG1, 1), (OBJ, 3)];
    const MODE7: [(u8, u8); 5] = [(BG1, 0), (OBJ, 0), (OBJ, 1), (OBJ, 2), (OBJ, 3)];
    match mode {
        0 => &MODE0,
        1 if bg3_priority => &MODE1_BG3_TOP,
        1 => &MODE1,
        2..=5 => &MODE2345,
        6 => &MODE6,
        _ => &MODE7,
    }
}

/// Bits per pixel of a background layer in a given mode, `None` if absent
fn layer_bpp(mode: u8, layer: u8) -> Option<u8> {
    match (mode, layer) {
        (0, 0..=3) => Some(2),
        (1, 0..=1) => Some(4),
        (1, 2) => Some(2),
        (2, 0..=1) => Some(4),
        (3, 0) => Some(8),
        (3, 1) => Some(4),
        (4, 0) => Some(8),
        (4, 1) => Some(2),
        (5, 0) => Some(4),
        (5, 1) => Some(2),
        (6, 0) => Some(4),
        _ => None,
    }
}

/// Reads a tilemap entry honoring the 32/64 screen layout
fn tilemap_entry(vram: &Vram, base: u16, wide: bool, tall: bool, tx: u16, ty: u16) -> u16 {
    let tx = tx & if wide { 0x7F } else { 0x1F };
    let ty = ty & if tall { 0x7F } else { 0x1F };
    let mut offset = (ty & 0x1F) * 32 + (tx & 0x1F);
    if tx >= 32 {
        offset += 0x400;
    }
    if ty >= 32 {
        offset += if wide { 0x800 } else { 0x400 };
    }
    vram.word(base.wrapping_add(offset))
}

fn tile_pixel_2bpp(vram: &Vram, tile_base: u16, x: u16, y: u16) -> u8 {
    let plane = vram.word(tile_base.wrapping_add(y));
    let shift = 7 - x;
    (((plane >> shift) & 1) | (((plane >> (8 + shift)) & 1) << 1)) as u8
}

fn tile_pixel_4bpp(vram: &Vram, tile_base: u16, x: u16, y: u16) -> u8 {
    let low = tile_pixel_2bpp(vram, tile_base, x, y);
    let high = tile_pixel_2bpp(vram, tile_base.wrapping_add(8), x, y);
    low | (high << 2)
}

fn tile_pixel_8bpp(vram: &Vram, tile_base: u16, x: u16, y: u16) -> u8 {
    let low = tile_pixel_4bpp(vram, tile_base, x, y);
    let high = tile_pixel_4bpp(vram, tile_base.wrapping_add(16), x, y);
    low | (high << 4)
}

/// Small/large sprite pixel sizes per the OBSEL select
fn object_sizes(select: u8) -> (u16, u16) {
    match select {
        0 => (8, 16),
        1 => (8, 32),
        2 => (8, 64),
        3 => (16, 32),
        4 => (16, 64),
        5 => (32, 64),
        _ => (16, 32),
    }
}

/// Per-component add/sub with clamp, optionally halved
fn color_math(main: u16, sub: u16, subtract: bool, half: bool) -> u16 {
    let mut out = 0;
    for shift in [0, 5, 10] {
        let a = ((main >> shift) & 0x1F) as i16;
        let b = ((sub >> shift) & 0x1F) as i16;
        let mut c = if subtract { a - b } else { a + b };
        if half {
            c >>= 1;
        }
        out |= (c.clamp(0, 31) as u16) << shift;
    }
    out
}

/// Expands 15bit BGR to ARGB, scaled by the master brightness
fn to_argb(color: u16, brightness: u32) -> u32 {
    let r = (color & 0x1F) as u32 * brightness / 15;
    let g = ((color >> 5) & 0x1F) as u32 * brightness / 15;
    let b = ((color >> 10) & 0x1F) as u32 * brightness / 15;
    0xFF000000 | (expand5(r) << 16) | (expand5(g) << 8) | expand5(b)
}

fn expand5(c: u32) -> u32 {
    (c << 3) | (c >> 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vblank_and_frame_events() {
        let mut ports = Ports::new();
        ports.io.ini_disp = 0x80; // force blank keeps rendering trivial
        let mut ppu = Ppu::new();
        let mut events = Vec::new();
        for _ in 0..LINE_COUNT {
            let event = ppu.step_scanline(&mut ports);
            if event != LineEvent::None {
                events.push((ppu.line(), event));
            }
        }
        assert_eq!(2, events.len());
        assert_eq!((VBLANK_LINE, LineEvent::EnterVblank), events[0]);
        assert!(matches!(events[1], (0, LineEvent::FrameDone)));
        assert!(!ppu.in_vblank());
    }

    #[test]
    fn force_blank_renders_black() {
        let mut ports = Ports::new();
        ports.io.ini_disp = 0x8F;
        ports.cgram.colors_mut()[0] = 0x7FFF;
        let mut ppu = Ppu::new();
        ppu.step_scanline(&mut ports);
        assert!(ppu.frame_buffer()[..SCREEN_WIDTH]
            .iter()
            .all(|&p| p == 0xFF000000));
    }

    #[test]
    fn backdrop_with_full_brightness() {
        let mut ports = Ports::new();
        ports.io.ini_disp = 0x0F;
        ports.cgram.colors_mut()[0] = 0x001F; // pure red in BGR
        let mut ppu = Ppu::new();
        ppu.step_scanline(&mut ports);
        assert_eq!(0xFFFF0000, ppu.frame_buffer()[0]);
    }

    #[test]
    fn mode0_tile_renders() {
        let mut ports = Ports::new();
        ports.io.ini_disp = 0x0F;
        ports.io.bg_mode = 0x00;
        ports.io.tm = 0x01; // BG1 on main
        ports.io.bg_sc = [0x04; 4]; // tilemap at word $0400
        ports.io.bg_nba = [0x00, 0x00]; // tiledata at word $0000
        // Tile 1: every pixel color index 1
        for y in 0..8 {
            ports.vram.words_mut()[8 + y] = 0x00FF;
        }
        // Top-left map cell selects tile 1, palette 0
        ports.vram.words_mut()[0x400] = 0x0001;
        ports.cgram.colors_mut()[1] = 0x03E0; // green
        let mut ppu = Ppu::new();
        ppu.step_scanline(&mut ports);
        assert_eq!(0xFF00FF00, ppu.frame_buffer()[0]);
        assert_eq!(0xFF00FF00, ppu.frame_buffer()[7]);
        // Tile 0 past the first column is transparent backdrop
        assert_eq!(0xFF000000, ppu.frame_buffer()[8]);
    }

    #[test]
    fn mode7_identity_matrix_samples_field() {
        let mut ports = Ports::new();
        ports.io.ini_disp = 0x0F;
        ports.io.bg_mode = 0x07;
        ports.io.tm = 0x01;
        ports.io.write_m7(0, 0x00);
        ports.io.write_m7(0, 0x01); // a = 1.0
        ports.io.write_m7(3, 0x00);
        ports.io.write_m7(3, 0x01); // d = 1.0
        // Map cell 0 selects tile 1; tile 1 pixel (0,0) is color 9
        ports.vram.words_mut()[0] = 0x0001;
        ports.vram.words_mut()[64] = 0x0900;
        ports.cgram.colors_mut()[9] = 0x001F;
        let mut ppu = Ppu::new();
        ppu.step_scanline(&mut ports);
        assert_eq!(0xFFFF0000, ppu.frame_buffer()[0]);
    }

    #[test]
    fn color_math_clamps() {
        assert_eq!(0x001F, color_math(0x001A, 0x0010, false, false));
        assert_eq!(0x0000, color_math(0x0010, 0x001A, true, false));
        assert_eq!(0x000A, color_math(0x000A, 0x000A, false, true));
    }

    #[test]
    fn window_combine_logic() {
        let mut io = PpuIo::new();
        io.wh = [10, 20, 15, 30];
        // Window 1 enabled for BG1
        io.w12_sel = 0x02;
        io.wbg_log = 0;
        let ppu = Ppu::new();
        assert!(ppu.window_active(&io, 0, 12));
        assert!(!ppu.window_active(&io, 0, 25));
        // OR of both windows
        io.w12_sel = 0x0A;
        assert!(ppu.window_active(&io, 0, 25));
        assert!(!ppu.window_active(&io, 0, 35));
    }

    #[test]
    fn sprite_pixel_renders() {
        let mut ports = Ports::new();
        ports.io.ini_disp = 0x0F;
        ports.io.bg_mode = 0x00;
        ports.io.tm = 0x10; // OBJ on main
        // Sprite 0 at (4, 0), tile 0, priority 0
        ports.oam.bytes_mut()[0] = 4;
        ports.oam.bytes_mut()[1] = 0;
        ports.oam.bytes_mut()[2] = 0;
        ports.oam.bytes_mut()[3] = 0;
        // Tile 0 row 0: color index 1 across
        ports.vram.words_mut()[0] = 0x00FF;
        ports.cgram.colors_mut()[129] = 0x001F;
        let mut ppu = Ppu::new();
        ppu.step_scanline(&mut ports);
        assert_eq!(0xFF000000, ppu.frame_buffer()[3]);
        assert_eq!(0xFFFF0000, ppu.frame_buffer()[4]);
        assert_eq!(0xFFFF0000, ppu.frame_buffer()[11]);
        assert_eq!(0xFF000000, ppu.frame_buffer()[12]);
    }
}

impl Ports {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        self.vram.save_state(w);
        self.cgram.save_state(w);
        self.oam.save_state(w);
        self.io.save_state(w);
        w.put_u16(self.latched_h);
        w.put_u16(self.latched_v);
        w.put_bool(self.ophct_high);
        w.put_bool(self.opvct_high);
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        self.vram.load_state(r);
        self.cgram.load_state(r);
        self.oam.load_state(r);
        self.io.load_state(r);
        self.latched_h = r.take_u16();
        self.latched_v = r.take_u16();
        self.ophct_high = r.take_bool();
        self.opvct_high = r.take_bool();
    }
}

impl Ppu {
    pub fn save_state(&self, w: &mut crate::savestate::StateWriter) {
        w.put_u16(self.line);
        w.put_bool(self.vblank);
    }

    pub fn load_state(&mut self, r: &mut crate::savestate::StateReader) {
        self.line = r.take_u16();
        self.vblank = r.take_bool();
    }
}
