// ============================================================================
// VkSharpen CLI — batch NIS sharpening from the command line
// ============================================================================
//
// Usage examples:
//   vksharpen photos/                              (every png/jpg/jpeg/bmp in photos/)
//   vksharpen -s 50 shot.png -o out/
//   vksharpen "shots/*.jpg" --kernel-dir build/NIS --keep-going
//
// All processing runs synchronously on the current thread: one image is
// uploaded, sharpened, read back and written before the next is touched.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::config::{KernelVariant, SharpenConfig};
use crate::gpu::GpuContext;
use crate::io::resolve_inputs;
use crate::sharpen::{Sharpener, Sharpness};
use crate::{log_err, log_info, logger};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// VkSharpen — NVIDIA Image Scaling sharpen filter on a Vulkan compute queue.
#[derive(Parser, Debug)]
#[command(
    name = "vksharpen",
    version,
    about = "Sharpen images with the NVIDIA Image Scaling (NIS) kernel on Vulkan",
    long_about = "Sharpen PNG, JPEG and BMP images on the GPU with the NIS sharpen\n\
                  compute kernel and write the results as PNG files named\n\
                  <stem>_Sharpened_<sharpness>%.png.\n\n\
                  Example:\n  \
                  vksharpen photos/ -s 50 -o sharpened/"
)]
pub struct CliArgs {
    /// Input directories, files or glob patterns.
    /// Directories are scanned (not recursively) for .png/.jpg/.jpeg/.bmp.
    #[arg(required = true, num_args = 1.., value_name = "INPUT")]
    pub inputs: Vec<String>,

    /// Sharpening strength, 0–100.
    #[arg(short, long, default_value = "100", value_name = "0-100", value_parser = parse_sharpness)]
    pub sharpness: Sharpness,

    /// Output directory (default: `output` next to the executable).
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Extra directory to search for the kernel binary. May be repeated;
    /// searched in the given order before the built-in locations.
    #[arg(long, value_name = "DIR")]
    pub kernel_dir: Vec<PathBuf>,

    /// Load the GLSL-compiled kernel (nis_sharpen_glsl.spv).
    #[arg(long)]
    pub glsl: bool,

    /// Enable Vulkan validation layers (messages go to the session log).
    #[arg(long)]
    pub validation: bool,

    /// Continue with the next image when one fails; exit code is still 1.
    #[arg(long)]
    pub keep_going: bool,

    /// Print per-file timing and mirror the session log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_sharpness(s: &str) -> Result<Sharpness, String> {
    s.parse()
}

impl CliArgs {
    /// Defaults, then environment, then these flags.
    pub fn sharpen_config(&self) -> SharpenConfig {
        let mut config = SharpenConfig::from_env();
        config.prepend_kernel_dirs(&self.kernel_dir);
        if self.glsl {
            config.kernel_variant = KernelVariant::Glsl;
        }
        if self.validation {
            config.validation = true;
        }
        config
    }

    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_dir)
    }
}

/// `<directory of the executable>/output`, or `./output` if that is unknown.
pub fn default_output_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("output")
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = every file succeeded (or nothing to do), `1` = failure.
pub fn run(args: CliArgs) -> ExitCode {
    logger::set_echo(args.verbose);

    let inputs = resolve_inputs(&args.inputs);
    if inputs.is_empty() {
        println!("No image files found.");
        log_info!("no inputs matched {:?}", args.inputs);
        return ExitCode::SUCCESS;
    }

    let output_dir = args.resolved_output_dir();
    if let Err(e) = std::fs::create_dir_all(&output_dir) {
        eprintln!(
            "error: could not create output directory '{}': {}",
            output_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let config = args.sharpen_config();
    log_info!("config: {:?}", config);

    let mut sharpener = match GpuContext::new(&config)
        .and_then(|ctx| Sharpener::new(ctx, &config, args.sharpness))
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: GPU initialisation failed: {}", e);
            log_err!("initialisation failed ({:?}): {}", e.category(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Sharpening {} image(s) at {} on {}",
        inputs.len(),
        args.sharpness,
        sharpener.context().device_name()
    );

    let total = inputs.len();
    let mut failures = 0usize;

    for (idx, input_path) in inputs.iter().enumerate() {
        println!("[{}/{}] {}", idx + 1, total, input_path.display());
        let file_start = Instant::now();

        match sharpener.process_image(input_path, &output_dir) {
            Ok(out) => {
                if args.verbose {
                    println!(
                        "  → {} ({:.0}ms)",
                        out.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                } else {
                    println!("  → {}", out.display());
                }
            }
            Err(e) => {
                eprintln!("  error: {}", e);
                failures += 1;
                if !args.keep_going {
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    if failures > 0 {
        eprintln!("{} of {} image(s) failed.", failures, total);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::try_parse_from(["vksharpen", "in.png"]).unwrap();
        assert_eq!(args.inputs, vec!["in.png"]);
        assert_eq!(args.sharpness.percent(), 100.0);
        assert!(args.output_dir.is_none());
        assert!(!args.glsl && !args.validation && !args.keep_going && !args.verbose);
        assert!(args.resolved_output_dir().ends_with("output"));
    }

    #[test]
    fn all_flags() {
        let args = CliArgs::try_parse_from([
            "vksharpen",
            "-s",
            "33.5",
            "-o",
            "out",
            "--kernel-dir",
            "k1",
            "--kernel-dir",
            "k2",
            "--glsl",
            "--validation",
            "--keep-going",
            "-v",
            "a.png",
            "b/",
        ])
        .unwrap();
        assert_eq!(args.sharpness.percent(), 33.5);
        assert_eq!(args.output_dir, Some(PathBuf::from("out")));
        assert_eq!(args.inputs, vec!["a.png", "b/"]);

        let config = args.sharpen_config();
        assert_eq!(config.kernel_dirs[0], PathBuf::from("k1"));
        assert_eq!(config.kernel_dirs[1], PathBuf::from("k2"));
        assert_eq!(config.kernel_variant, KernelVariant::Glsl);
        assert!(config.validation);
    }

    #[test]
    fn sharpness_is_checked_at_parse_time() {
        assert!(CliArgs::try_parse_from(["vksharpen", "-s", "150", "a.png"]).is_err());
        assert!(CliArgs::try_parse_from(["vksharpen", "-s", "-1", "a.png"]).is_err());
        assert!(CliArgs::try_parse_from(["vksharpen", "-s", "NaN", "a.png"]).is_err());
        assert!(CliArgs::try_parse_from(["vksharpen", "-s", "sharp", "a.png"]).is_err());
        assert!(CliArgs::try_parse_from(["vksharpen", "-s", "0", "a.png"]).is_ok());
    }

    #[test]
    fn input_is_required() {
        assert!(CliArgs::try_parse_from(["vksharpen"]).is_err());
    }

    #[test]
    fn no_matches_exits_cleanly() {
        let args = CliArgs::try_parse_from([
            "vksharpen",
            "/nonexistent-vksharpen-dir/*.png",
            "-o",
            "/nonexistent-vksharpen-dir/out",
        ])
        .unwrap();
        assert_eq!(run(args), ExitCode::SUCCESS);
    }
}
