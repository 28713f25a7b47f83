//! Drawing interface of the display driver

use super::state::{Dirty, Mode, UiState};
use crate::storage::{Quantity, SeriesView};

/// Pixel-level drawing is left to the implementor; the frame loop decides
/// what to draw and when.
pub trait Renderer {
    type Error: core::fmt::Debug;

    /// Full main screen: indicators, outlook, connection and clock.
    fn draw_main(&mut self, state: &UiState) -> Result<(), Self::Error>;

    /// Full graph of one vault in the given mode.
    fn draw_graph(&mut self, quantity: Quantity, series: &dyn SeriesView, mode: Mode) -> Result<(), Self::Error>;

    fn pan(&mut self, series: &dyn SeriesView, step: i16) -> Result<(), Self::Error>;

    fn move_cursor(&mut self, series: &dyn SeriesView, step: i16) -> Result<(), Self::Error>;

    /// Redraw the main-screen parts flagged in `dirty`.
    fn update_main(&mut self, state: &UiState, dirty: Dirty) -> Result<(), Self::Error>;

    fn set_backlight(&mut self, on: bool) -> Result<(), Self::Error>;
}
