// ============================================================================
// NIS PARAMETERS — kernel config record and per-vendor dispatch shape
// ============================================================================
//
// `NisConfig` is read verbatim by the sharpen kernel through a uniform buffer,
// so the field order and the 4-byte scalars are a binary contract.

use bytemuck::{Pod, Zeroable};

use crate::error::{Result, SharpenError};

/// Colour encoding of the input, which selects the parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdrMode {
    #[default]
    None,
    Linear,
    Pq,
}

/// Sharpen kernel parameters (28 scalars, 112 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct NisConfig {
    pub detect_ratio: f32,
    pub detect_thres: f32,
    pub min_contrast_ratio: f32,
    pub ratio_norm: f32,

    pub contrast_boost: f32,
    pub eps: f32,
    pub sharp_start_y: f32,
    pub sharp_scale_y: f32,

    pub sharp_strength_min: f32,
    pub sharp_strength_scale: f32,
    pub sharp_limit_min: f32,
    pub sharp_limit_scale: f32,

    pub scale_x: f32,
    pub scale_y: f32,

    pub dst_norm_x: f32,
    pub dst_norm_y: f32,
    pub src_norm_x: f32,
    pub src_norm_y: f32,

    pub input_viewport_origin_x: u32,
    pub input_viewport_origin_y: u32,
    pub input_viewport_width: u32,
    pub input_viewport_height: u32,

    pub output_viewport_origin_x: u32,
    pub output_viewport_origin_y: u32,
    pub output_viewport_width: u32,
    pub output_viewport_height: u32,

    pub reserved0: f32,
    pub reserved1: f32,
}

/// Input/output rectangles for one sharpen pass.  Sharpening never scales,
/// so the input and output textures share a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            origin_x: 0,
            origin_y: 0,
            width,
            height,
        }
    }
}

impl NisConfig {
    /// Parameters for sharpening a `texture_width` x `texture_height` image
    /// over its full extent.
    pub fn sharpen(sharpness: f32, texture_width: u32, texture_height: u32, hdr: HdrMode) -> Result<Self> {
        Self::sharpen_viewport(
            sharpness,
            texture_width,
            texture_height,
            Viewport::full(texture_width, texture_height),
            hdr,
        )
    }

    /// Parameters for sharpening `viewport` of a texture.  An empty viewport
    /// means the whole texture.
    pub fn sharpen_viewport(
        sharpness: f32,
        texture_width: u32,
        texture_height: u32,
        viewport: Viewport,
        hdr: HdrMode,
    ) -> Result<Self> {
        let viewport = if viewport.width == 0 || viewport.height == 0 {
            Viewport::full(texture_width, texture_height)
        } else {
            viewport
        };
        if texture_width == 0 || texture_height == 0 {
            return Err(SharpenError::EmptyImage {
                width: texture_width,
                height: texture_height,
            });
        }

        // NaN would clamp to NaN; treat it as "no sharpening".
        let sharpness = if sharpness.is_nan() { 0.0 } else { sharpness.clamp(0.0, 1.0) };
        let slider = sharpness - 0.5;

        let max_scale = if slider >= 0.0 { 1.25 } else { 1.75 };
        let min_scale = if slider >= 0.0 { 1.25 } else { 1.0 };
        let limit_scale = if slider >= 0.0 { 1.25 } else { 1.0 };

        let mut detect_thres = 64.0 / 1024.0;
        let mut min_contrast_ratio = 2.0;
        let mut max_contrast_ratio = 10.0;
        let mut sharp_start_y = 0.45;
        let mut sharp_end_y = 0.9;
        let mut strength_min = (0.4 + slider * min_scale * 1.2f32).max(0.0);
        let mut strength_max = 1.6 + slider * max_scale * 1.8;
        let mut limit_min = (0.14 + slider * limit_scale * 0.32f32).max(0.1);
        let mut limit_max = 0.5 + slider * limit_scale * 0.6;

        if hdr != HdrMode::None {
            detect_thres = 32.0 / 1024.0;
            min_contrast_ratio = 1.5;
            max_contrast_ratio = 5.0;
            strength_min = (0.4 + slider * min_scale * 1.1f32).max(0.0);
            strength_max = 2.2 + slider * max_scale * 1.8;
            limit_min = (0.10 + slider * limit_scale * 0.28f32).max(0.06);
            limit_max = 0.6 + slider * limit_scale * 0.6;
            (sharp_start_y, sharp_end_y) = if hdr == HdrMode::Pq { (0.35, 0.55) } else { (0.3, 0.5) };
        }

        Ok(Self {
            detect_ratio: 2.0 * 1127.0 / 1024.0,
            detect_thres,
            min_contrast_ratio,
            ratio_norm: 1.0 / (max_contrast_ratio - min_contrast_ratio),
            contrast_boost: 1.0,
            eps: 1.0 / 255.0,
            sharp_start_y,
            sharp_scale_y: 1.0 / (sharp_end_y - sharp_start_y),
            sharp_strength_min: strength_min,
            sharp_strength_scale: strength_max - strength_min,
            sharp_limit_min: limit_min,
            sharp_limit_scale: limit_max - limit_min,
            scale_x: 1.0,
            scale_y: 1.0,
            dst_norm_x: 1.0 / texture_width as f32,
            dst_norm_y: 1.0 / texture_height as f32,
            src_norm_x: 1.0 / texture_width as f32,
            src_norm_y: 1.0 / texture_height as f32,
            input_viewport_origin_x: viewport.origin_x,
            input_viewport_origin_y: viewport.origin_y,
            input_viewport_width: viewport.width,
            input_viewport_height: viewport.height,
            output_viewport_origin_x: viewport.origin_x,
            output_viewport_origin_y: viewport.origin_y,
            output_viewport_width: viewport.width,
            output_viewport_height: viewport.height,
            reserved0: 0.0,
            reserved1: 0.0,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

// ============================================================================
// Dispatch shape
// ============================================================================

/// GPU family, used to pick the kernel's dispatch shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuArchitecture {
    NvidiaGeneric,
    AmdGeneric,
    IntelGeneric,
}

impl GpuArchitecture {
    pub const NVIDIA_VENDOR_ID: u32 = 0x10DE;
    pub const AMD_VENDOR_ID: u32 = 0x1002;
    pub const INTEL_VENDOR_ID: u32 = 0x8086;

    /// Unknown vendors get the NVIDIA profile.
    pub fn from_vendor_id(vendor_id: u32) -> Self {
        match vendor_id {
            Self::AMD_VENDOR_ID => GpuArchitecture::AmdGeneric,
            Self::INTEL_VENDOR_ID => GpuArchitecture::IntelGeneric,
            _ => GpuArchitecture::NvidiaGeneric,
        }
    }

    /// Output tile handled by one workgroup, plus the preferred thread count.
    pub fn sharpen_block(self) -> BlockSize {
        let thread_group = match self {
            GpuArchitecture::NvidiaGeneric => 128,
            GpuArchitecture::AmdGeneric | GpuArchitecture::IntelGeneric => 256,
        };
        BlockSize {
            width: 32,
            height: 32,
            thread_group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize {
    pub width: u32,
    pub height: u32,
    pub thread_group: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn record_is_112_bytes() {
        assert_eq!(std::mem::size_of::<NisConfig>(), 112);
        assert_eq!(std::mem::align_of::<NisConfig>(), 4);
        let cfg = NisConfig::sharpen(0.5, 8, 8, HdrMode::None).unwrap();
        assert_eq!(cfg.as_bytes().len(), 112);
    }

    #[test]
    fn midpoint_uses_base_values() {
        let cfg = NisConfig::sharpen(0.5, 640, 480, HdrMode::None).unwrap();
        assert!(close(cfg.sharp_strength_min, 0.4));
        assert!(close(cfg.sharp_strength_scale, 1.2));
        assert!(close(cfg.sharp_limit_min, 0.14));
        assert!(close(cfg.sharp_limit_scale, 0.36));
        assert!(close(cfg.detect_ratio, 2.0 * 1127.0 / 1024.0));
        assert!(close(cfg.ratio_norm, 1.0 / 8.0));
        assert!(close(cfg.sharp_scale_y, 1.0 / 0.45));
        assert!(close(cfg.src_norm_x, 1.0 / 640.0));
        assert!(close(cfg.dst_norm_y, 1.0 / 480.0));
        assert_eq!(cfg.output_viewport_width, 640);
        assert_eq!(cfg.input_viewport_height, 480);
        assert_eq!(cfg.input_viewport_origin_x, 0);
    }

    #[test]
    fn extremes_hit_the_floors() {
        let cfg = NisConfig::sharpen(0.0, 16, 16, HdrMode::None).unwrap();
        assert!(close(cfg.sharp_strength_min, 0.0));
        assert!(close(cfg.sharp_strength_scale, 1.6 - 0.5 * 1.75 * 1.8));
        assert!(close(cfg.sharp_limit_min, 0.1));
        assert!(close(cfg.sharp_limit_scale, 0.2 - 0.1));

        let cfg = NisConfig::sharpen(1.0, 16, 16, HdrMode::None).unwrap();
        assert!(close(cfg.sharp_strength_min, 0.4 + 0.5 * 1.25 * 1.2));
        assert!(close(cfg.sharp_strength_scale, (1.6 + 0.5 * 1.25 * 1.8) - (0.4 + 0.5 * 1.25 * 1.2)));
    }

    #[test]
    fn out_of_range_sharpness_is_clamped() {
        let over = NisConfig::sharpen(3.0, 16, 16, HdrMode::None).unwrap();
        let max = NisConfig::sharpen(1.0, 16, 16, HdrMode::None).unwrap();
        assert_eq!(over, max);
        let nan = NisConfig::sharpen(f32::NAN, 16, 16, HdrMode::None).unwrap();
        let min = NisConfig::sharpen(0.0, 16, 16, HdrMode::None).unwrap();
        assert_eq!(nan, min);
    }

    #[test]
    fn hdr_modes_change_luma_window() {
        let pq = NisConfig::sharpen(0.5, 16, 16, HdrMode::Pq).unwrap();
        assert!(close(pq.sharp_start_y, 0.35));
        assert!(close(pq.sharp_scale_y, 1.0 / 0.2));
        assert!(close(pq.detect_thres, 32.0 / 1024.0));
        let linear = NisConfig::sharpen(0.5, 16, 16, HdrMode::Linear).unwrap();
        assert!(close(linear.sharp_start_y, 0.3));
        assert!(close(linear.ratio_norm, 1.0 / 3.5));
        assert!(close(linear.sharp_strength_scale, 1.8));
    }

    #[test]
    fn zero_extent_is_rejected() {
        assert!(matches!(
            NisConfig::sharpen(0.5, 0, 16, HdrMode::None),
            Err(SharpenError::EmptyImage { width: 0, height: 16 })
        ));
    }

    #[test]
    fn vendor_profiles() {
        assert_eq!(GpuArchitecture::from_vendor_id(0x10DE), GpuArchitecture::NvidiaGeneric);
        assert_eq!(GpuArchitecture::from_vendor_id(0x1002), GpuArchitecture::AmdGeneric);
        assert_eq!(GpuArchitecture::from_vendor_id(0x8086), GpuArchitecture::IntelGeneric);
        assert_eq!(GpuArchitecture::from_vendor_id(0x13B5), GpuArchitecture::NvidiaGeneric);

        let nv = GpuArchitecture::NvidiaGeneric.sharpen_block();
        assert_eq!((nv.width, nv.height, nv.thread_group), (32, 32, 128));
        let amd = GpuArchitecture::AmdGeneric.sharpen_block();
        assert_eq!((amd.width, amd.height, amd.thread_group), (32, 32, 256));
    }
}
