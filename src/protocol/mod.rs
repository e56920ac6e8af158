//! Protocol data model shared by the service, the transport and clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version advertised in every metadata reply.
pub const PROTOCOL_VERSION: u32 = 1;

/// Zero-based button coordinate: `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ButtonPosition {
    pub x: u32,
    pub y: u32,
}

impl ButtonPosition {
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for ButtonPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A width/height pair, used both for grid sizes and image resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Number of button columns and rows on a deck.
pub type GridSize = Size;

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether `pos` addresses a button inside a grid of this size.
    #[must_use]
    pub const fn contains(&self, pos: ButtonPosition) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    /// Clamp each component into `[min, max]`.
    ///
    /// The upper bound wins if `min` exceeds `max` on a component.
    #[must_use]
    pub fn clamp(self, min: Size, max: Size) -> Size {
        Size {
            width: self.width.max(min.width).min(max.width),
            height: self.height.max(min.height).min(max.height),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encoding of the bytes carried in a [`ButtonImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Interleaved 8-bit RGBA, row-major, no padding.
    #[default]
    Rgba32,
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba32 => 4,
        }
    }
}

/// Raw pixels for one button. The core never inspects `pixel_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonImage {
    pub pixel_data: Vec<u8>,
    #[serde(default)]
    pub format: PixelFormat,
    pub size: Size,
}

impl ButtonImage {
    /// Whether the buffer length matches the declared size and format.
    ///
    /// A declared size whose byte count does not fit in `usize` is never
    /// well-formed.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        (self.size.width as usize)
            .checked_mul(self.size.height as usize)
            .and_then(|pixels| pixels.checked_mul(self.format.bytes_per_pixel()))
            .is_some_and(|expected| self.pixel_data.len() == expected)
    }
}

/// A capability advertised in [`DeviceMetadata`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "feature", rename_all = "snake_case")]
pub enum Feature {
    /// Buttons accept text labels of up to `max_length` characters.
    Label { max_length: u32 },

    /// Buttons accept images; `preferred_resolution` is the native size.
    Display { preferred_resolution: Size },

    /// The grid can be resized within `[min_size, max_size]`.
    CustomGrid { min_size: Size, max_size: Size },

    /// Device-specific capability identified by name.
    Custom { name: String },
}

/// Device description returned by `get_meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub protocol_version: u32,
    pub device_id: String,
    pub device_type_id: String,
    pub grid_size: GridSize,
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// Status codes carried by error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Unimplemented,
    InvalidArgument,
    Unavailable,
    Internal,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unimplemented => "unimplemented",
            Self::InvalidArgument => "invalid_argument",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
