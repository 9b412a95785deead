// ============================================================================
// GPU MODULE — wgpu backend for the canvas render pipeline
// ============================================================================
//
// Architecture:
//   context.rs    — wgpu Device, Queue, adapter init
//   shaders.rs    — WGSL source for the background + canvas passes
//   texture.rs    — CanvasTexture wrapper with partial upload
//   renderer.rs   — GpuRenderer: RenderBackend over an offscreen target
// ============================================================================

pub mod context;
pub mod shaders;
pub mod texture;
pub mod renderer;

pub use renderer::GpuRenderer;

/// Round `width * 4` up to wgpu's buffer-copy row alignment (256 bytes).
pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
    let unaligned = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}

/// Drop the row padding a buffer copy added.
pub(crate) fn unpad_rows(padded: &[u8], width: u32, height: u32, padded_row: u32) -> Vec<u8> {
    let actual_row = (width * 4) as usize;
    let mut out = Vec::with_capacity(actual_row * height as usize);
    for y in 0..height as usize {
        let start = y * padded_row as usize;
        out.extend_from_slice(&padded[start..start + actual_row]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_align_to_256_bytes() {
        assert_eq!(aligned_bytes_per_row(1), 256);
        assert_eq!(aligned_bytes_per_row(64), 256);
        assert_eq!(aligned_bytes_per_row(65), 512);
    }

    #[test]
    fn unpadding_keeps_only_pixel_bytes() {
        let mut padded = vec![0u8; 2 * 256];
        padded[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        padded[256..264].copy_from_slice(&[9, 9, 9, 9, 8, 8, 8, 8]);
        let out = unpad_rows(&padded, 2, 2, 256);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 9, 9, 9, 8, 8, 8, 8]);
    }
}
