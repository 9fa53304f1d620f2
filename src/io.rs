// ============================================================================
// IMAGE I/O — decode to RGBA8, PNG output, input discovery, output naming
// ============================================================================

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage};

use crate::error::{Result, SharpenError};
use crate::log_warn;

/// Extensions picked up when scanning a directory (compared lowercase).
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Host-side image: tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaPixels {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaPixels {
    /// Wrap `data`, checking it holds exactly `width * height` texels.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(SharpenError::PixelData(format!(
                "{}x{} RGBA8 needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Single-colour image.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn row_pitch(&self) -> u32 {
        self.width * 4
    }
}

impl From<RgbaImage> for RgbaPixels {
    fn from(img: RgbaImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            data: img.into_raw(),
        }
    }
}

/// Decode any supported file to RGBA8.
pub fn load_rgba(path: &Path) -> Result<RgbaPixels> {
    let img = image::open(path).map_err(|source| SharpenError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_rgba8().into())
}

/// Write `pixels` as an 8-bit RGBA PNG.
pub fn save_png(pixels: &RgbaPixels, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_png(pixels, &mut writer).map_err(|source| SharpenError::Encode {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode into any writer, flushing it at the end so buffered write errors surface.
fn write_png<W: Write>(pixels: &RgbaPixels, mut writer: W) -> image::ImageResult<()> {
    PngEncoder::new(&mut writer).write_image(
        &pixels.data,
        pixels.width,
        pixels.height,
        image::ColorType::Rgba8,
    )?;
    writer.flush()?;
    Ok(())
}

/// Two decimals with trailing zeros and a trailing dot removed: `50`, `33.33`, `12.5`.
pub fn format_percentage(value: f32) -> String {
    let text = format!("{:.2}", value);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// `{stem}_Sharpened_{pct}%.png`
pub fn output_file_name(stem: &str, sharpness: f32) -> String {
    format!("{}_Sharpened_{}%.png", stem, format_percentage(sharpness))
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// Supported image files directly inside `dir` (not recursive), sorted by path.
pub fn collect_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_supported_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Expand directories, literal files and glob patterns into a deduplicated,
/// ordered list.  Unmatched patterns are reported and skipped.
pub fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();
    let push = |path: PathBuf, result: &mut Vec<PathBuf>| {
        if !result.contains(&path) {
            result.push(path);
        }
    };

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.is_dir() {
            match collect_inputs(as_path) {
                Ok(files) => files.into_iter().for_each(|f| push(f, &mut result)),
                Err(e) => {
                    eprintln!("warning: cannot read directory '{}': {}", pattern, e);
                    log_warn!("cannot read directory '{}': {}", pattern, e);
                }
            }
            continue;
        }

        if as_path.exists() {
            push(as_path.to_path_buf(), &mut result);
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if entry.is_file() {
                        push(entry, &mut result);
                        matched = true;
                    }
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vksharpen-io-{}-{}", tag, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn percentage_trims_zeros() {
        assert_eq!(format_percentage(50.0), "50");
        assert_eq!(format_percentage(100.0), "100");
        assert_eq!(format_percentage(0.0), "0");
        assert_eq!(format_percentage(33.333), "33.33");
        assert_eq!(format_percentage(12.5), "12.5");
        assert_eq!(format_percentage(10.0), "10");
    }

    #[test]
    fn output_names() {
        assert_eq!(output_file_name("cat", 50.0), "cat_Sharpened_50%.png");
        assert_eq!(output_file_name("cat", 33.333), "cat_Sharpened_33.33%.png");
    }

    #[test]
    fn pixel_length_is_checked() {
        assert!(RgbaPixels::new(2, 2, vec![0; 16]).is_ok());
        assert!(matches!(
            RgbaPixels::new(2, 2, vec![0; 15]),
            Err(SharpenError::PixelData(_))
        ));
        let white = RgbaPixels::filled(3, 2, [255; 4]);
        assert_eq!(white.data.len(), 24);
        assert_eq!(white.row_pitch(), 12);
    }

    #[test]
    fn directory_scan_filters_and_sorts() {
        let dir = scratch_dir("scan");
        for name in ["b.PNG", "a.jpg", "c.jpeg", "d.bmp", "notes.txt", "e.gif"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        std::fs::create_dir_all(dir.join("nested.png")).unwrap();

        let found: Vec<String> = collect_inputs(&dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["a.jpg", "b.PNG", "c.jpeg", "d.bmp"]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_dedups_dirs_files_and_globs() {
        let dir = scratch_dir("resolve");
        std::fs::write(dir.join("one.png"), b"x").unwrap();
        std::fs::write(dir.join("two.bmp"), b"x").unwrap();

        let dir_str = dir.to_string_lossy().into_owned();
        let one = dir.join("one.png").to_string_lossy().into_owned();
        let glob = format!("{}/*.bmp", dir_str);
        let resolved = resolve_inputs(&[dir_str, one, glob]);
        assert_eq!(resolved, vec![dir.join("one.png"), dir.join("two.bmp")]);

        assert!(resolve_inputs(&[format!("{}/*.jpg", dir.display())]).is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Accepts `limit` bytes, then fails every write and flush.
    struct FullDisk {
        written: usize,
        limit: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.written + buf.len() > self.limit {
                return Err(std::io::Error::other("disk full"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if self.written >= self.limit {
                Err(std::io::Error::other("disk full"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn buffered_write_failure_is_reported() {
        let pixels = RgbaPixels::filled(8, 8, [1, 2, 3, 255]);
        let mut sink = BufWriter::with_capacity(1 << 16, FullDisk { written: 0, limit: 16 });
        // Everything fits in the BufWriter; only the final flush reaches the sink.
        assert!(write_png(&pixels, &mut sink).is_err());

        let mut roomy = Vec::new();
        write_png(&pixels, &mut roomy).unwrap();
        assert!(roomy.starts_with(b"\x89PNG"));
    }

    #[test]
    fn png_round_trip() {
        let dir = scratch_dir("png");
        let path = dir.join("px.png");
        let mut pixels = RgbaPixels::filled(3, 2, [10, 20, 30, 255]);
        pixels.data[0] = 200;
        save_png(&pixels, &path).unwrap();
        assert_eq!(load_rgba(&path).unwrap(), pixels);

        std::fs::write(dir.join("junk.png"), b"not a png").unwrap();
        assert!(matches!(
            load_rgba(&dir.join("junk.png")),
            Err(SharpenError::Decode { .. })
        ));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
