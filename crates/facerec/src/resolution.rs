//! Types for representing frame and network input resolutions.

use std::fmt;

/// Resolution (`width x height`) of a camera frame or a network input.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// Input resolution of the small detection network: `320x320`
    pub const DETECT_320: Self = Self {
        width: 320,
        height: 320,
    };

    /// Input resolution of the large detection network: `640x640`
    pub const DETECT_640: Self = Self {
        width: 640,
        height: 640,
    };

    /// 1080p resolution: `1920x1080`
    pub const RES_1080P: Self = Self {
        width: 1920,
        height: 1080,
    };

    /// Creates a new [`Resolution`] of `width x height`.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the width of this [`Resolution`].
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the height of this [`Resolution`].
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the length of the longer side.
    ///
    /// Detector outputs are normalized to this length, since the detector input is created by
    /// padding the frame to a square.
    #[inline]
    pub fn longer_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
