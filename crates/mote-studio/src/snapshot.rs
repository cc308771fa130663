use std::path::Path;

use anyhow::{Context, Result, ensure};
use image::RgbaImage;

/// Converts RGBA floats in `[0, 1]` to 8-bit and writes a PNG.
pub fn write_png(path: &Path, width: u32, height: u32, rgba: &[f32]) -> Result<()> {
    ensure!(
        rgba.len() == width as usize * height as usize * 4,
        "snapshot has {} floats, expected {}x{}x4",
        rgba.len(),
        width,
        height
    );
    let bytes = rgba
        .iter()
        .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    let image = RgbaImage::from_raw(width, height, bytes).context("snapshot buffer too small")?;
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_readable_png() {
        let path = std::env::temp_dir().join(format!("mote-snapshot-{}.png", std::process::id()));
        let rgba = [1.0, 0.0, 0.5, 1.0].repeat(4);
        write_png(&path, 2, 2, &rgba).unwrap();
        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (2, 2));
        assert_eq!(back.get_pixel(1, 1).0, [255, 0, 128, 255]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn wrong_length_is_an_error() {
        let path = std::env::temp_dir().join("mote-never-written.png");
        assert!(write_png(&path, 2, 2, &[0.0; 3]).is_err());
    }
}
