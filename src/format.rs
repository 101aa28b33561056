//! Pixel Formats
//!
//! Formats a drawable can be negotiated in, their byte sizes, the RGB masks
//! used for image transfer, and the stride rule for fresh drawables.

/// Pixel formats understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb565,
    Argb4444,
    Argb8888,
}

/// Red, green and blue channel masks of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl PixelFormat {
    /// Map an X visual/drawable depth to a format. Other depths are unsupported.
    pub fn from_depth(depth: u8) -> Option<Self> {
        match depth {
            16 => Some(Self::Rgb565),
            24 | 32 => Some(Self::Argb8888),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgb565 | Self::Argb4444 => 2,
            Self::Argb8888 => 4,
        }
    }

    pub fn bits_per_pixel(self) -> u8 {
        (self.bytes_per_pixel() * 8) as u8
    }

    /// Channel masks for image transfer. Anything that is not 4444 or 8888
    /// uses the 565 layout.
    pub fn rgb_masks(self) -> RgbMasks {
        match self {
            Self::Argb4444 => RgbMasks {
                red: 0xF00,
                green: 0xF0,
                blue: 0xF,
            },
            Self::Argb8888 => RgbMasks {
                red: 0xFF_0000,
                green: 0xFF00,
                blue: 0xFF,
            },
            _ => RgbMasks {
                red: 0xF800,
                green: 0x7E0,
                blue: 0x1F,
            },
        }
    }
}

/// Stride (in pixels) of a freshly created drawable: width rounded up to 32.
pub fn aligned_stride(width: u32) -> u32 {
    (width + 0x1F) & !0x1F
}
