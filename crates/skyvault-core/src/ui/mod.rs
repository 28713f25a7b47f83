//! Display state and encoder navigation
//!
//! This module provides:
//! - [`UiState`], everything the screen shows, guarded by the station's state lock
//! - The encoder state machine that moves between screens and graph modes
//! - The [`Renderer`] trait implemented by the display driver

pub mod navigation;
pub mod renderer;
pub mod state;

pub use navigation::{MinuteChange, UiCommand};
pub use renderer::Renderer;
pub use state::{Dirty, Mode, RadioStatus, Screen, UiState};

/// Rotary encoder gestures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    TurnLeft { fast: bool },
    TurnRight { fast: bool },
    Click,
    Hold,
}

impl InputEvent {
    /// Turn direction: -1 for left, 1 for right, 0 for presses.
    pub const fn direction(&self) -> i16 {
        match self {
            InputEvent::TurnLeft { .. } => -1,
            InputEvent::TurnRight { .. } => 1,
            InputEvent::Click | InputEvent::Hold => 0,
        }
    }
}
