// tests/gpu_pipeline.rs — End-to-end tests against a real Vulkan device.
//
// These run with `cargo test --test gpu_pipeline`.
// Each test builds its own GpuContext, so resource counts are per test.
// Machines without a Vulkan device skip with a note on stderr.  Tests that
// run the sharpen kernel also skip when its binary is not on the search path
// (see VKSHARPEN_KERNEL_DIR).

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use vksharpen::gpu::buffer::GpuBuffer;
use vksharpen::gpu::compute::locate_kernel;
use vksharpen::gpu::{GpuContext, GpuImage, TEXTURE_FORMAT};
use vksharpen::{RgbaPixels, SharpenConfig, SharpenError, Sharpener, Sharpness};

fn sharpener(percent: f32) -> Option<Sharpener> {
    let config = SharpenConfig::from_env();
    if let Err(e) = locate_kernel(&config.kernel_dirs, config.kernel_variant.file_name()) {
        eprintln!("skipping: {}", e);
        return None;
    }
    let ctx = match GpuContext::new(&config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("skipping: no usable Vulkan device ({})", e);
            return None;
        }
    };
    Some(Sharpener::new(ctx, &config, Sharpness::new(percent).unwrap()).unwrap())
}

/// A device only; buffer and image tests need no kernel binary.
fn context() -> Option<Arc<GpuContext>> {
    match GpuContext::new(&SharpenConfig::from_env()) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: no usable Vulkan device ({})", e);
            None
        }
    }
}

fn host_buffer(ctx: &Arc<GpuContext>, instance_size: u64, count: u32) -> GpuBuffer {
    GpuBuffer::new(
        ctx,
        instance_size,
        count,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::UNIFORM_BUFFER,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        256,
    )
    .unwrap()
}

fn gradient(width: u32, height: u32) -> RgbaPixels {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let v = ((x * 255) / width.max(1)) as u8;
            let edge = if (x / 4 + y / 4) % 2 == 0 { 0 } else { 128 };
            data.extend_from_slice(&[v, v.wrapping_add(edge), 255 - v, 255]);
        }
    }
    RgbaPixels::new(width, height, data).unwrap()
}

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vksharpen-it-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// ===== Pixel core =====

#[test]
fn flat_white_is_unchanged_at_zero_sharpness() {
    let Some(mut s) = sharpener(0.0) else { return };
    let white = RgbaPixels::filled(4, 4, [255, 255, 255, 255]);
    let out = s.sharpen_pixels(&white).unwrap();
    assert_eq!(out, white);
}

#[test]
fn output_keeps_dimensions() {
    let Some(mut s) = sharpener(60.0) else { return };
    // Not a multiple of the 32x32 block in either direction.
    let input = gradient(45, 33);
    let out = s.sharpen_pixels(&input).unwrap();
    assert_eq!((out.width, out.height), (45, 33));
    assert_eq!(out.data.len(), input.data.len());
}

#[test]
fn same_input_gives_identical_bytes() {
    let Some(mut s) = sharpener(75.0) else { return };
    let input = gradient(64, 40);
    let first = s.sharpen_pixels(&input).unwrap();
    let second = s.sharpen_pixels(&input).unwrap();
    assert_eq!(first, second);
}

// ===== Resource accounting =====

#[test]
fn every_image_and_view_is_released() {
    let Some(mut s) = sharpener(50.0) else { return };
    const N: usize = 3;
    for i in 0..N {
        s.sharpen_pixels(&gradient(16 + i as u32, 16)).unwrap();
    }
    let snap = s.context().ledger().snapshot();
    assert_eq!(snap.images_created, 2 * N);
    assert_eq!(snap.images_destroyed, 2 * N);
    assert_eq!(snap.views_created, 2 * N);
    assert_eq!(snap.views_destroyed, 2 * N);
}

#[test]
fn failed_image_leaks_nothing_and_the_next_one_works() {
    let Some(mut s) = sharpener(50.0) else { return };
    let empty = RgbaPixels::new(0, 0, Vec::new()).unwrap();
    assert!(matches!(
        s.sharpen_pixels(&empty),
        Err(SharpenError::EmptyImage { .. })
    ));
    let snap = s.context().ledger().snapshot();
    assert_eq!(snap.live_images(), 0);
    assert_eq!(snap.live_views(), 0);

    s.sharpen_pixels(&gradient(8, 8)).unwrap();
    let snap = s.context().ledger().snapshot();
    assert_eq!(snap.images_created, 2);
    assert_eq!(snap.live_images(), 0);
}

#[test]
fn failure_after_partial_allocation_releases_everything() {
    let Some(ctx) = context() else { return };
    let pixels = gradient(8, 8);
    {
        let input = GpuImage::sampled(&ctx, 8, 8, TEXTURE_FORMAT, &pixels.data, pixels.row_pitch()).unwrap();
        let _view = input.create_view().unwrap();
        let snap = ctx.ledger().snapshot();
        assert_eq!((snap.live_images(), snap.live_views()), (1, 1));

        let output = GpuImage::storage(&ctx, 0, 8, TEXTURE_FORMAT);
        assert!(matches!(output, Err(SharpenError::EmptyImage { width: 0, height: 8 })));
    }
    let snap = ctx.ledger().snapshot();
    assert_eq!(snap.images_created, 1);
    assert_eq!(snap.images_created, snap.images_destroyed);
    assert_eq!(snap.views_created, 1);
    assert_eq!(snap.views_created, snap.views_destroyed);
}

// ===== Buffers and images =====

#[test]
fn unmapped_buffer_refuses_host_access() {
    let Some(ctx) = context() else { return };
    let mut buffer = host_buffer(&ctx, 112, 2);
    assert!(!buffer.is_mapped());
    assert!(matches!(buffer.write_whole(&[1, 2, 3]), Err(SharpenError::NotMapped)));
    assert!(matches!(buffer.read(0, 4), Err(SharpenError::NotMapped)));

    buffer.map_whole().unwrap();
    buffer.write_whole(&[1, 2, 3]).unwrap();
    assert_eq!(buffer.read(0, 3).unwrap(), vec![1, 2, 3]);

    buffer.unmap();
    buffer.unmap();
    assert!(matches!(buffer.write_to_index(&[0; 4], 1), Err(SharpenError::NotMapped)));
}

#[test]
fn indexed_writes_stay_inside_their_slot() {
    let Some(ctx) = context() else { return };
    let mut buffer = host_buffer(&ctx, 112, 2);
    assert_eq!(buffer.alignment_size(), 256);
    assert_eq!(buffer.size(), 512);
    buffer.map_whole().unwrap();

    buffer.write_to_index(&[7; 112], 1).unwrap();
    assert_eq!(buffer.read(256, 112).unwrap(), vec![7; 112]);
    assert!(matches!(
        buffer.write_to_index(&[0; 113], 0),
        Err(SharpenError::BufferOverflow { .. })
    ));
    assert!(matches!(
        buffer.write_to_index(&[0; 4], 2),
        Err(SharpenError::BufferOverflow { offset: 512, .. })
    ));
    assert!(matches!(
        buffer.write(&[0; 16], 504),
        Err(SharpenError::BufferOverflow { .. })
    ));
}

#[test]
fn copy_out_requires_transfer_source_layout() {
    let Some(ctx) = context() else { return };
    let image = GpuImage::storage(&ctx, 4, 4, TEXTURE_FORMAT).unwrap();
    assert_eq!(image.layout(), vk::ImageLayout::UNDEFINED);
    let staging = host_buffer(&ctx, image.byte_size(), 1);

    let result = ctx.one_shot(|device, cmd| image.copy_to_buffer(device, cmd, &staging));
    assert!(matches!(
        result,
        Err(SharpenError::Sequence {
            current: "UNDEFINED",
            attempted: "copy_to_buffer"
        })
    ));
}

// ===== File path =====

#[test]
fn process_image_writes_named_png() {
    let Some(mut s) = sharpener(33.333) else { return };
    let dir = scratch_dir("process");
    let input = dir.join("photo.png");
    image::RgbaImage::from_raw(20, 10, gradient(20, 10).data)
        .unwrap()
        .save(&input)
        .unwrap();

    let out = s.process_image(&input, &dir).unwrap();
    assert_eq!(out, dir.join("photo_Sharpened_33.33%.png"));
    let written = image::open(&out).unwrap().to_rgba8();
    assert_eq!(written.dimensions(), (20, 10));

    let missing = s.process_image(&dir.join("missing.png"), &dir);
    assert!(matches!(missing, Err(SharpenError::Decode { .. })));
    std::fs::remove_dir_all(&dir).unwrap();
}
