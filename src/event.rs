use crate::protocol::ButtonPosition;
use serde::{Deserialize, Serialize};

/// Button interaction pushed to every event stream subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A button was pressed.
    ButtonDown { button: ButtonPosition },

    /// A button was released.
    ButtonUp { button: ButtonPosition },

    /// A full press-and-release was recognised on a button.
    ButtonClick { button: ButtonPosition },
}

impl Event {
    /// The button this event refers to.
    #[must_use]
    pub const fn button(&self) -> ButtonPosition {
        match self {
            Self::ButtonDown { button }
            | Self::ButtonUp { button }
            | Self::ButtonClick { button } => *button,
        }
    }

    /// Short lowercase name, used in logs and the CLI.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ButtonDown { .. } => "down",
            Self::ButtonUp { .. } => "up",
            Self::ButtonClick { .. } => "click",
        }
    }
}
