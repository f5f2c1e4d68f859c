use crate::error::{CameraError, Result};
use crate::format::PixelFormat;

/// Stateless raster layout conversions between the supported 4:2:0 formats
pub struct PixelConverter;

impl PixelConverter {
    /// Convert one frame from `src_format` into `dst_format`.
    ///
    /// Returns the number of bytes written to `dst`. Matching formats are a
    /// straight copy, NV12/NV21 swap the interleaved chroma bytes and
    /// YU12/YV12 swap the two chroma planes. Every argument is validated
    /// before the first byte is written, so a failed conversion leaves `dst`
    /// untouched.
    pub fn convert(
        src: &[u8],
        src_format: PixelFormat,
        dst: &mut [u8],
        dst_format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<usize> {
        let size = Self::validate(src, src_format, dst, dst_format, width, height)?;

        match (src_format, dst_format) {
            (a, b) if a == b => {
                dst[..size].copy_from_slice(&src[..size]);
            }
            (PixelFormat::Nv12, PixelFormat::Nv21) | (PixelFormat::Nv21, PixelFormat::Nv12) => {
                Self::swap_interleaved_chroma(&src[..size], &mut dst[..size], width, height);
            }
            (PixelFormat::Yuv420, PixelFormat::Yvu420) | (PixelFormat::Yvu420, PixelFormat::Yuv420) => {
                Self::swap_chroma_planes(&src[..size], &mut dst[..size], width, height);
            }
            _ => unreachable!("conversion pair validated above"),
        }

        Ok(size)
    }

    /// Whether a conversion between the two layouts is implemented.
    pub fn supports(src_format: PixelFormat, dst_format: PixelFormat) -> bool {
        src_format == dst_format
            || matches!(
                (src_format, dst_format),
                (PixelFormat::Nv12, PixelFormat::Nv21)
                    | (PixelFormat::Nv21, PixelFormat::Nv12)
                    | (PixelFormat::Yuv420, PixelFormat::Yvu420)
                    | (PixelFormat::Yvu420, PixelFormat::Yuv420)
            )
    }

    fn validate(
        src: &[u8],
        src_format: PixelFormat,
        dst: &[u8],
        dst_format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<usize> {
        if !Self::supports(src_format, dst_format) {
            return Err(CameraError::unsupported_format(format!(
                "{} -> {}",
                src_format, dst_format
            )));
        }

        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(CameraError::invalid_argument(format!(
                "Invalid frame geometry {}x{}",
                width, height
            )));
        }

        let size = src_format.frame_size(width, height)?;
        if src.len() < size {
            return Err(CameraError::invalid_argument(format!(
                "Source buffer too small: expected {}, got {}",
                size,
                src.len()
            )));
        }
        if dst.len() < size {
            return Err(CameraError::invalid_argument(format!(
                "Destination buffer too small: expected {}, got {}",
                size,
                dst.len()
            )));
        }

        Ok(size)
    }

    /// NV12 <-> NV21: copy luma, then swap each chroma byte pair.
    ///
    /// Both slices must hold exactly one frame.
    pub fn swap_interleaved_chroma(src: &[u8], dst: &mut [u8], width: u32, height: u32) {
        let luma = width as usize * height as usize;
        let chroma = luma / 2;

        dst[..luma].copy_from_slice(&src[..luma]);

        let src_uv = &src[luma..luma + chroma];
        let dst_uv = &mut dst[luma..luma + chroma];
        for (d, s) in dst_uv.chunks_exact_mut(2).zip(src_uv.chunks_exact(2)) {
            d[0] = s[1];
            d[1] = s[0];
        }
    }

    /// In-place variant of [`PixelConverter::swap_interleaved_chroma`].
    pub fn swap_interleaved_chroma_in_place(frame: &mut [u8], width: u32, height: u32) {
        let luma = width as usize * height as usize;
        let chroma = luma / 2;

        for pair in frame[luma..luma + chroma].chunks_exact_mut(2) {
            pair.swap(0, 1);
        }
    }

    /// YU12 <-> YV12: copy luma, then exchange the two quarter-size chroma planes.
    pub fn swap_chroma_planes(src: &[u8], dst: &mut [u8], width: u32, height: u32) {
        let luma = width as usize * height as usize;
        let quarter = luma / 4;

        dst[..luma].copy_from_slice(&src[..luma]);

        let (first, second) = src[luma..luma + 2 * quarter].split_at(quarter);
        dst[luma..luma + quarter].copy_from_slice(second);
        dst[luma + quarter..luma + 2 * quarter].copy_from_slice(first);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn nv_frame(width: u32, height: u32) -> Vec<u8> {
        let size = PixelFormat::Nv12.frame_size(width, height).unwrap();
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_identity_conversion_is_byte_exact() {
        let src = nv_frame(8, 4);
        for format in PixelFormat::ALL {
            let mut dst = vec![0u8; src.len()];
            let written = PixelConverter::convert(&src, format, &mut dst, format, 8, 4).unwrap();
            assert_eq!(written, src.len());
            assert_eq!(dst, src);
        }
    }

    #[test]
    fn test_chroma_swap_reorders_pairs() {
        // 4x2 frame: 8 luma bytes, 4 chroma bytes laid out as v0,u0,v1,u1
        let src = vec![1, 2, 3, 4, 5, 6, 7, 8, 10, 20, 11, 21];
        let mut dst = vec![0u8; src.len()];

        PixelConverter::convert(&src, PixelFormat::Nv21, &mut dst, PixelFormat::Nv12, 4, 2).unwrap();

        assert_eq!(&dst[..8], &src[..8]);
        assert_eq!(&dst[8..], &[20, 10, 21, 11]);
    }

    #[test]
    fn test_chroma_swap_is_an_involution() {
        let src = nv_frame(16, 8);
        let mut once = vec![0u8; src.len()];
        let mut twice = vec![0u8; src.len()];

        PixelConverter::convert(&src, PixelFormat::Nv12, &mut once, PixelFormat::Nv21, 16, 8).unwrap();
        PixelConverter::convert(&once, PixelFormat::Nv21, &mut twice, PixelFormat::Nv12, 16, 8).unwrap();

        assert_ne!(once, src);
        assert_eq!(twice, src);

        let mut in_place = src.clone();
        PixelConverter::swap_interleaved_chroma_in_place(&mut in_place, 16, 8);
        assert_eq!(in_place, once);
    }

    #[test]
    fn test_planar_chroma_swap() {
        // 4x2: 8 luma, 2 U, 2 V
        let src = vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4];
        let mut dst = vec![9u8; src.len()];

        PixelConverter::convert(&src, PixelFormat::Yuv420, &mut dst, PixelFormat::Yvu420, 4, 2).unwrap();

        assert_eq!(&dst[8..], &[3, 4, 1, 2]);
    }

    #[test]
    fn test_unsupported_pair_writes_nothing() {
        let src = nv_frame(4, 2);
        let mut dst = vec![0xAAu8; src.len()];

        let err = PixelConverter::convert(&src, PixelFormat::Nv12, &mut dst, PixelFormat::Yuv420, 4, 2)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(dst.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_short_buffers_are_rejected() {
        let src = nv_frame(4, 2);
        let mut small = vec![0u8; src.len() - 1];

        let err = PixelConverter::convert(&src, PixelFormat::Nv12, &mut small, PixelFormat::Nv21, 4, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut dst = vec![0u8; src.len()];
        let err = PixelConverter::convert(&src[..4], PixelFormat::Nv12, &mut dst, PixelFormat::Nv21, 4, 2)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_odd_geometry_is_rejected() {
        let src = vec![0u8; 64];
        let mut dst = vec![0u8; 64];
        assert!(PixelConverter::convert(&src, PixelFormat::Nv12, &mut dst, PixelFormat::Nv21, 3, 2).is_err());
        assert!(PixelConverter::convert(&src, PixelFormat::Nv12, &mut dst, PixelFormat::Nv21, 0, 2).is_err());
    }

    #[test]
    fn test_oversized_geometry_is_rejected() {
        let src = vec![0u8; 64];
        let mut dst = vec![0x55u8; 64];
        let err = PixelConverter::convert(
            &src,
            PixelFormat::Nv12,
            &mut dst,
            PixelFormat::Nv21,
            u32::MAX - 1,
            u32::MAX - 1,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(dst.iter().all(|&b| b == 0x55));
    }
}
