//! Contracts a concrete device implements to be served by
//! [`DeviceService`](crate::service::DeviceService).
//!
//! [`ButtonEventSource`] and [`GridSizeProvider`] are mandatory. The setters
//! are optional; each one that is supplied shows up as a
//! [`Feature`](crate::protocol::Feature) in the device metadata.
//!
//! All mutators take `&self`. A provider that keeps state is expected to
//! synchronise it internally, since the service may call it from several
//! connection tasks at once.

pub mod hub;

pub use hub::ButtonEventHub;

use crate::protocol::{ButtonImage, ButtonPosition, GridSize, Size};
use std::sync::Arc;

/// Handle returned by [`ButtonEventSource::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receives raw button interactions from a device.
///
/// Callbacks may arrive on any thread and must not block.
pub trait ButtonListener: Send + Sync {
    fn on_button_down(&self, button: ButtonPosition);
    fn on_button_up(&self, button: ButtonPosition);
    fn on_button_click(&self, button: ButtonPosition);
}

/// Push-only source of button interactions.
pub trait ButtonEventSource: Send + Sync {
    /// Register a listener. It stays registered until removed.
    fn add_listener(&self, listener: Arc<dyn ButtonListener>) -> ListenerId;

    /// Remove a listener. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}

/// Reports the current grid size.
pub trait GridSizeProvider: Send + Sync {
    fn grid_size(&self) -> GridSize;
}

/// Applies text labels to buttons.
pub trait ButtonLabelSetter: Send + Sync {
    /// Longest label, in characters, the device can show.
    fn max_length(&self) -> u32;

    fn set_button_label(&self, button: ButtonPosition, label: &str);
}

/// Applies images to buttons.
pub trait ButtonImageSetter: Send + Sync {
    /// Native image size of one button.
    fn preferred_resolution(&self) -> Size;

    /// Apply `image` as received. Buffers are not validated upstream.
    fn set_button_image(&self, button: ButtonPosition, image: &ButtonImage);
}

/// Resizes the button grid.
pub trait GridSizeSetter: Send + Sync {
    fn min_grid_size(&self) -> GridSize;
    fn max_grid_size(&self) -> GridSize;

    /// Apply a size already clamped into `[min_grid_size, max_grid_size]`.
    ///
    /// The device decides what happens to state of buttons that remain
    /// inside the new grid.
    fn set_grid_size(&self, size: GridSize);
}
