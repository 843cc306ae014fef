//! Scanline composition: background, then window, then objects.

use arrayvec::ArrayVec;

use super::{
    LcdControl, Obj, ObjPriority, OBJ_PER_LINE_COUNT, SCREEN_HEIGHT, SCREEN_WIDTH,
    TILE_MAP_WIDTH, WINDOW_MAX_X, WINDOW_X_OFFSET,
};
use crate::Emulator;

/// Palette index at (x, y) of a 256x256 tile-map layer.
fn tile_map_palette_index(
    map: &[u8; 0x400],
    tiles: &[[u8; 64]],
    tile_base: usize,
    x: u8,
    y: u8,
) -> u8 {
    let tile_index = map[usize::from(y >> 3) * TILE_MAP_WIDTH | usize::from(x >> 3)];
    let tile = &tiles[tile_base + usize::from(tile_index)];
    tile[usize::from(y & 7) * 8 | usize::from(x & 7)]
}

impl Emulator {
    pub(crate) fn render_line(&mut self, line_y: u8) {
        if line_y >= SCREEN_HEIGHT as u8 {
            return;
        }

        let ppu = &self.ppu;
        let vram = &self.vram;
        let line_start = usize::from(line_y) * SCREEN_WIDTH;
        let line = &mut self.frame_buffer[line_start..line_start + SCREEN_WIDTH];

        // Per-pixel record of whether the BG/window left color 0 there;
        // behind-BG objects may only draw on those pixels.
        let mut bg_is_zero = [true; SCREEN_WIDTH];
        line.fill(super::RGBA_WHITE);

        if ppu.lcdc.contains(LcdControl::BG_DISPLAY) {
            let map = &vram.map[ppu.lcdc.bg_tile_map()];
            let tile_base = ppu.lcdc.tile_data_base();
            let bg_y = line_y.wrapping_add(ppu.scy);
            let mut bg_x = ppu.scx;
            for sx in 0..SCREEN_WIDTH {
                let palette_index =
                    tile_map_palette_index(map, &vram.tile, tile_base, bg_x, bg_y);
                bg_is_zero[sx] = palette_index == 0;
                line[sx] = ppu.bgp.color[usize::from(palette_index)].to_rgba();
                bg_x = bg_x.wrapping_add(1);
            }
        }

        if ppu.lcdc.contains(LcdControl::WINDOW_DISPLAY)
            && ppu.wx <= WINDOW_MAX_X
            && line_y >= ppu.frame_wy
        {
            let map = &vram.map[ppu.lcdc.window_tile_map()];
            let tile_base = ppu.lcdc.tile_data_base();
            let win_y = ppu.win_y;
            let (mut win_x, mut sx) = if ppu.wx < WINDOW_X_OFFSET {
                // Window starts off the left edge: skip its first pixels.
                (WINDOW_X_OFFSET - ppu.wx, 0)
            } else {
                (0, usize::from(ppu.wx - WINDOW_X_OFFSET))
            };
            while sx < SCREEN_WIDTH {
                let palette_index =
                    tile_map_palette_index(map, &vram.tile, tile_base, win_x, win_y);
                bg_is_zero[sx] = palette_index == 0;
                line[sx] = ppu.bgp.color[usize::from(palette_index)].to_rgba();
                win_x = win_x.wrapping_add(1);
                sx += 1;
            }
            self.ppu.win_y += 1;
        }

        let ppu = &self.ppu;
        if ppu.lcdc.contains(LcdControl::OBJ_DISPLAY) {
            let obj_height = ppu.lcdc.obj_height();

            // First ten objects in OAM order whose y-range covers the
            // line, with y rewritten relative to the line.
            let mut line_objs: ArrayVec<(usize, Obj), OBJ_PER_LINE_COUNT> = ArrayVec::new();
            for (index, obj) in self.oam.iter().enumerate() {
                let rel_y = line_y.wrapping_sub(obj.y);
                if rel_y < obj_height {
                    let mut obj = *obj;
                    obj.y = rel_y;
                    if line_objs.try_push((index, obj)).is_err() {
                        break;
                    }
                }
            }
            // Lowest x wins overlaps, OAM order breaks ties; drawing in
            // reverse puts the winners on top.
            line_objs.sort_unstable_by_key(|&(index, obj)| (obj.x, index));

            for &(_, obj) in line_objs.iter().rev() {
                let mut oy = obj.y;
                if obj.yflip {
                    oy = obj_height - 1 - oy;
                }
                let row = if obj_height == 8 {
                    &self.vram.tile[usize::from(obj.tile)][usize::from(oy) * 8..]
                } else if oy < 8 {
                    &self.vram.tile[usize::from(obj.tile & 0xfe)][usize::from(oy) * 8..]
                } else {
                    &self.vram.tile[usize::from(obj.tile | 0x01)][usize::from(oy - 8) * 8..]
                };
                let palette = &ppu.obp[usize::from(obj.palette)];

                for n in 0..8u8 {
                    let sx = obj.x.wrapping_add(n);
                    if usize::from(sx) >= SCREEN_WIDTH {
                        continue;
                    }
                    if obj.priority == ObjPriority::BehindBg && !bg_is_zero[usize::from(sx)] {
                        continue;
                    }
                    let palette_index = row[usize::from(if obj.xflip { 7 - n } else { n })];
                    if palette_index != 0 {
                        line[usize::from(sx)] =
                            palette.color[usize::from(palette_index)].to_rgba();
                    }
                }
            }
        }
    }
}
