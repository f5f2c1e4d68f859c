use crate::error::{CameraError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pack four ASCII characters into a V4L2 fourcc code.
pub const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// Render a fourcc code as text, escaping non-printable bytes.
pub fn fourcc_to_string(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                (b as char).to_string()
            } else {
                format!("\\x{:02x}", b)
            }
        })
        .collect()
}

/// Raster layouts accepted by the capture engine.
///
/// All of them are 4:2:0 chroma-subsampled at 12 bits per pixel: a full
/// resolution luma plane followed by `width * height / 2` bytes of chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar Y, then V, then U (V4L2 `YVU420`, fourcc `YV12`)
    Yvu420,
    /// Planar Y, then U, then V (V4L2 `YUV420`, fourcc `YU12`)
    Yuv420,
    /// Semi-planar Y, then interleaved V/U (fourcc `NV21`)
    Nv21,
    /// Semi-planar Y, then interleaved U/V (fourcc `NV12`)
    Nv12,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 4] = [
        PixelFormat::Yvu420,
        PixelFormat::Yuv420,
        PixelFormat::Nv21,
        PixelFormat::Nv12,
    ];

    pub fn fourcc(&self) -> u32 {
        match self {
            PixelFormat::Yvu420 => fourcc(b"YV12"),
            PixelFormat::Yuv420 => fourcc(b"YU12"),
            PixelFormat::Nv21 => fourcc(b"NV21"),
            PixelFormat::Nv12 => fourcc(b"NV12"),
        }
    }

    /// Look up a format by its V4L2 fourcc code.
    pub fn from_fourcc(code: u32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.fourcc() == code)
            .ok_or_else(|| CameraError::unsupported_format(fourcc_to_string(code)))
    }

    pub fn bits_per_pixel(&self) -> usize {
        12
    }

    /// Whether chroma is stored as one interleaved plane
    pub fn is_semi_planar(&self) -> bool {
        matches!(self, PixelFormat::Nv21 | PixelFormat::Nv12)
    }

    /// Exact byte size of one frame at the given geometry.
    ///
    /// Fails with `InvalidArgument` when the size does not fit in `usize`.
    pub fn frame_size(&self, width: u32, height: u32) -> Result<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(self.bits_per_pixel()))
            .map(|bits| bits / 8)
            .ok_or_else(|| {
                CameraError::invalid_argument(format!(
                    "Frame geometry {}x{} is too large",
                    width, height
                ))
            })
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fourcc_to_string(self.fourcc()))
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YV12" | "YVU420" => Ok(PixelFormat::Yvu420),
            "YU12" | "YUV420" | "I420" => Ok(PixelFormat::Yuv420),
            "NV21" => Ok(PixelFormat::Nv21),
            "NV12" => Ok(PixelFormat::Nv12),
            _ => Err(CameraError::unsupported_format(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_fourcc_codes() {
        assert_eq!(PixelFormat::Nv12.fourcc(), 0x3231_564e);
        assert_eq!(PixelFormat::Nv21.fourcc(), 0x3132_564e);
        assert_eq!(PixelFormat::Yuv420.fourcc(), 0x3231_5559);
        assert_eq!(PixelFormat::Yvu420.fourcc(), 0x3231_5659);
    }

    #[test]
    fn test_from_fourcc_roundtrip_and_rejection() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_fourcc(format.fourcc()).unwrap(), format);
        }

        let err = PixelFormat::from_fourcc(fourcc(b"MJPG")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert!(err.to_string().contains("MJPG"));
    }

    #[test]
    fn test_frame_size_is_twelve_bits_per_pixel() {
        for format in PixelFormat::ALL {
            for (w, h) in [(640u32, 480u32), (1280, 720), (176, 144), (2, 2)] {
                assert_eq!(format.frame_size(w, h).unwrap(), (w * h * 12 / 8) as usize);
            }
        }
        assert_eq!(PixelFormat::Nv12.frame_size(640, 480).unwrap(), 460_800);
    }

    #[test]
    fn test_frame_size_overflow_is_invalid_argument() {
        let err = PixelFormat::Nv12
            .frame_size(u32::MAX - 1, u32::MAX - 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("nv12".parse::<PixelFormat>().unwrap(), PixelFormat::Nv12);
        assert_eq!("I420".parse::<PixelFormat>().unwrap(), PixelFormat::Yuv420);
        assert!("RGB3".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_display_escapes_unprintable() {
        assert_eq!(PixelFormat::Nv21.to_string(), "NV21");
        assert_eq!(fourcc_to_string(0x0000_4142), "BA\\x00\\x00");
    }
}
