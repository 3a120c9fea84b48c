//! Placeholder frames for rooms whose source cannot be opened.
//!
//! The frame is a fixed-size dark canvas with a light border and a bit strip
//! encoding the room id, so it is visibly tagged and the same room always
//! yields the same pixels.

use crate::frame::{Frame, FrameOrigin, RGB_CHANNELS};

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

const BACKGROUND: [u8; 3] = [16, 16, 16];
const INK: [u8; 3] = [255, 255, 255];
const BORDER: u32 = 4;
const CELL_W: u32 = 8;
const CELL_H: u32 = 24;
const STRIP_TOP: u32 = 200;
const STRIP_LEFT: u32 = 64;
/// Id bytes that fit in one strip row at 8 cells per byte.
const BYTES_PER_ROW: u32 = (PLACEHOLDER_WIDTH - 2 * STRIP_LEFT) / (8 * CELL_W);
const MAX_ROWS: u32 = 4;

/// Render the placeholder for `room_id`.
pub fn render(room_id: &str) -> Frame {
    let mut canvas = Canvas::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, BACKGROUND);

    canvas.fill_rect(0, 0, PLACEHOLDER_WIDTH, BORDER, INK);
    canvas.fill_rect(0, PLACEHOLDER_HEIGHT - BORDER, PLACEHOLDER_WIDTH, BORDER, INK);
    canvas.fill_rect(0, 0, BORDER, PLACEHOLDER_HEIGHT, INK);
    canvas.fill_rect(PLACEHOLDER_WIDTH - BORDER, 0, BORDER, PLACEHOLDER_HEIGHT, INK);

    let max_bytes = (BYTES_PER_ROW * MAX_ROWS) as usize;
    for (i, byte) in room_id.bytes().take(max_bytes).enumerate() {
        let i = i as u32;
        let row = i / BYTES_PER_ROW;
        let col = i % BYTES_PER_ROW;
        for bit in 0..8u32 {
            if byte & (0x80 >> bit) == 0 {
                continue;
            }
            let x = STRIP_LEFT + (col * 8 + bit) * CELL_W;
            let y = STRIP_TOP + row * (CELL_H + 4);
            canvas.fill_rect(x, y, CELL_W - 1, CELL_H, INK);
        }
    }

    Frame::new(
        canvas.data,
        PLACEHOLDER_WIDTH,
        PLACEHOLDER_HEIGHT,
        FrameOrigin::Placeholder {
            room_id: room_id.to_string(),
        },
    )
}

struct Canvas {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Canvas {
    fn new(width: u32, height: u32, color: [u8; 3]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take((width * height * RGB_CHANNELS) as usize)
            .collect();
        Self {
            data,
            width,
            height,
        }
    }

    fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        let x_end = (x + w).min(self.width);
        let y_end = (y + h).min(self.height);
        for row in y..y_end {
            for col in x..x_end {
                let idx = ((row * self.width + col) * RGB_CHANNELS) as usize;
                self.data[idx..idx + 3].copy_from_slice(&color);
            }
        }
    }
}
