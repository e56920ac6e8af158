pub mod input;

use crate::capability::{
    ButtonEventHub, ButtonEventSource, ButtonImageSetter, ButtonLabelSetter, ButtonListener,
    GridSizeProvider, GridSizeSetter, ListenerId,
};
use crate::config::schema::AppConfig;
use crate::error::Result;
use crate::protocol::{ButtonImage, ButtonPosition, GridSize, Size};
use crate::service::{DeviceIdentity, DeviceService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

/// Per-button state held by the virtual deck.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonState {
    pub label: Option<String>,
    pub image: Option<ButtonImage>,
}

#[derive(Debug)]
struct DeckState {
    grid: GridSize,
    buttons: HashMap<ButtonPosition, ButtonState>,
}

/// Headless in-memory deck implementing every capability.
///
/// Button presses come from [`press`](Self::press) and friends (driven by
/// [`input::read_input_loop`] in the daemon).
pub struct VirtualDeck {
    events: ButtonEventHub,
    state: Mutex<DeckState>,
    max_label_length: u32,
    resolution: Size,
    min_grid: GridSize,
    max_grid: GridSize,
}

impl VirtualDeck {
    pub fn new(grid: GridSize) -> Self {
        Self {
            events: ButtonEventHub::new(),
            state: Mutex::new(DeckState {
                grid,
                buttons: HashMap::new(),
            }),
            max_label_length: 20,
            resolution: Size::new(72, 72),
            min_grid: Size::new(1, 1),
            max_grid: Size::new(8, 8),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut deck = Self::new(config.device.grid);
        if let Some(label) = &config.label {
            deck.max_label_length = label.max_length;
        }
        if let Some(display) = &config.display {
            deck.resolution = display.preferred_resolution;
        }
        if let Some(grid) = &config.custom_grid {
            deck.min_grid = grid.min;
            deck.max_grid = grid.max;
        }
        deck
    }

    /// Snapshot of one button's state.
    pub fn button(&self, button: ButtonPosition) -> Option<ButtonState> {
        self.lock().buttons.get(&button).cloned()
    }

    pub fn down(&self, button: ButtonPosition) -> bool {
        self.if_on_grid(button, |events| events.button_down(button))
    }

    pub fn up(&self, button: ButtonPosition) -> bool {
        self.if_on_grid(button, |events| events.button_up(button))
    }

    pub fn click(&self, button: ButtonPosition) -> bool {
        self.if_on_grid(button, |events| events.button_click(button))
    }

    /// Full press: down, up, then click, as a toolkit button would report it.
    pub fn press(&self, button: ButtonPosition) -> bool {
        self.if_on_grid(button, |events| {
            events.button_down(button);
            events.button_up(button);
            events.button_click(button);
        })
    }

    /// Log the grid and every button that carries state.
    pub fn log_state(&self) {
        let state = self.lock();
        info!(
            "grid {}, {} buttons with state",
            state.grid,
            state.buttons.len()
        );
        let mut positions: Vec<_> = state.buttons.keys().copied().collect();
        positions.sort_by_key(|p| (p.y, p.x));
        for pos in positions {
            let button = &state.buttons[&pos];
            info!(
                "  {pos}: label={:?} image={}",
                button.label,
                button
                    .image
                    .as_ref()
                    .map_or_else(|| "none".to_string(), |img| img.size.to_string())
            );
        }
    }

    fn if_on_grid(&self, button: ButtonPosition, emit: impl FnOnce(&ButtonEventHub)) -> bool {
        let grid = self.lock().grid;
        if grid.contains(button) {
            emit(&self.events);
            true
        } else {
            warn!("button {button} is outside the {grid} grid");
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ButtonEventSource for VirtualDeck {
    fn add_listener(&self, listener: Arc<dyn ButtonListener>) -> ListenerId {
        self.events.add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.events.remove_listener(id);
    }
}

impl GridSizeProvider for VirtualDeck {
    fn grid_size(&self) -> GridSize {
        self.lock().grid
    }
}

impl ButtonLabelSetter for VirtualDeck {
    fn max_length(&self) -> u32 {
        self.max_label_length
    }

    fn set_button_label(&self, button: ButtonPosition, label: &str) {
        info!("label {button} = {label:?}");
        self.lock().buttons.entry(button).or_default().label = Some(label.to_string());
    }
}

impl ButtonImageSetter for VirtualDeck {
    fn preferred_resolution(&self) -> Size {
        self.resolution
    }

    fn set_button_image(&self, button: ButtonPosition, image: &ButtonImage) {
        if !image.is_well_formed() {
            warn!(
                "ignoring image for {button}: {} bytes do not match {} {:?}",
                image.pixel_data.len(),
                image.size,
                image.format
            );
            return;
        }
        info!("image {button} = {}", image.size);
        self.lock().buttons.entry(button).or_default().image = Some(image.clone());
    }
}

impl GridSizeSetter for VirtualDeck {
    fn min_grid_size(&self) -> GridSize {
        self.min_grid
    }

    fn max_grid_size(&self) -> GridSize {
        self.max_grid
    }

    /// Buttons still inside the new grid keep their state; the rest is dropped.
    fn set_grid_size(&self, size: GridSize) {
        let mut state = self.lock();
        info!("grid {} -> {size}", state.grid);
        state.grid = size;
        state.buttons.retain(|pos, _| size.contains(*pos));
    }
}

/// Build a service over `deck`, enabling the features `config` asks for.
///
/// # Errors
/// Returns `DeviceError::Config` if the identity is blank.
pub fn build_service(deck: &Arc<VirtualDeck>, config: &AppConfig) -> Result<DeviceService> {
    let identity = DeviceIdentity::new(&config.device.id, &config.device.type_id);
    let mut builder = DeviceService::builder(identity, deck.clone(), deck.clone());

    if config.label.is_some() {
        builder = builder.label_setter(deck.clone());
    }
    if config.display.is_some() {
        builder = builder.image_setter(deck.clone());
    }
    if config.custom_grid.is_some() {
        builder = builder.grid_size_setter(deck.clone());
    }
    for name in &config.custom_features {
        builder = builder.custom_feature(name);
    }

    builder.build()
}
