//! Synthesized thumbnails for files with nothing usable to show.

use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};

const PALETTE: [[u8; 3]; 8] = [
    [0x3b, 0x5b, 0x92],
    [0x8e, 0x44, 0xad],
    [0x16, 0xa0, 0x85],
    [0xc0, 0x39, 0x2b],
    [0xd3, 0x54, 0x00],
    [0x27, 0xae, 0x60],
    [0x2c, 0x3e, 0x50],
    [0x7f, 0x8c, 0x8d],
];

/// Stable color for an extension.
pub fn color_for(ext: &str) -> [u8; 3] {
    let digest = Sha256::digest(ext.to_ascii_lowercase().as_bytes());
    PALETTE[digest[0] as usize % PALETTE.len()]
}

fn shade(color: [u8; 3], factor: f32) -> Rgb<u8> {
    Rgb(color.map(|c| (c as f32 * factor).clamp(0.0, 255.0) as u8))
}

/// Vertical gradient in the extension's color.
pub fn color_tile(ext: &str, width: u32, height: u32) -> RgbImage {
    let color = color_for(ext);
    let height_f = height.max(1) as f32;
    RgbImage::from_fn(width, height, |_, y| {
        shade(color, 1.0 - 0.45 * (y as f32 / height_f))
    })
}

/// Dark tile with an eighth-note glyph, for audio without cover art.
pub fn note_tile(width: u32, height: u32) -> RgbImage {
    let background = [0x22, 0x27, 0x2e];
    let ink = Rgb([0xe6, 0xe6, 0xe6]);
    let mut img = RgbImage::from_fn(width, height, |_, y| {
        shade(background, 1.0 - 0.3 * (y as f32 / height.max(1) as f32))
    });

    let unit = (height.min(width) as f32 / 12.0).max(1.0);
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    // Note head: tilted ellipse, lower left of center
    let (hx, hy) = (cx - unit, cy + 2.5 * unit);
    let (rx, ry) = (1.6 * unit, 1.1 * unit);
    let (sin, cos) = (-0.35f32).sin_cos();
    // Stem rises from the right edge of the head
    let stem_x0 = hx + rx - 0.5 * unit;
    let stem_x1 = stem_x0 + 0.5 * unit;
    let stem_top = cy - 4.0 * unit;
    // Flag hangs off the top of the stem
    let flag_x1 = stem_x1 + 2.0 * unit;

    for (x, y, px) in img.enumerate_pixels_mut() {
        let (fx, fy) = (x as f32 + 0.5, y as f32 + 0.5);

        let dx = fx - hx;
        let dy = fy - hy;
        let u = dx * cos - dy * sin;
        let v = dx * sin + dy * cos;
        let in_head = (u / rx).powi(2) + (v / ry).powi(2) <= 1.0;

        let in_stem = fx >= stem_x0 && fx <= stem_x1 && fy >= stem_top && fy <= hy;

        let flag_t = (fx - stem_x1) / (flag_x1 - stem_x1);
        let flag_y = stem_top + flag_t * 2.5 * unit;
        let in_flag = (0.0..=1.0).contains(&flag_t) && fy >= flag_y && fy <= flag_y + unit;

        if in_head || in_stem || in_flag {
            *px = ink;
        }
    }
    img
}

/// SVG placeholder served when no thumbnail can be produced right now.
pub fn placeholder_svg(label: &str) -> String {
    let label: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(5)
        .collect::<String>()
        .to_ascii_uppercase();
    let [r, g, b] = color_for(&label);
    format!(
        concat!(
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="320" height="180" viewBox="0 0 320 180">"##,
            r##"<rect width="320" height="180" fill="#{:02x}{:02x}{:02x}"/>"##,
            r##"<text x="160" y="100" font-family="sans-serif" font-size="36" "##,
            r##"fill="#ffffff" text-anchor="middle">{}</text></svg>"##
        ),
        r, g, b, label
    )
}
