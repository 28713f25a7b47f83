//! State shown on the display

use crate::sensors::{IndoorReadings, OutdoorReadings};
use crate::solar::{Outlook, SolarEvents};
use crate::storage::Quantity;
use crate::time::DateTime;

/// Screens in encoder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Main,
    OutTemp,
    OutHum,
    OutPress,
    InTemp,
    InHum,
    Co2,
}

impl Screen {
    pub const ALL: [Screen; 7] = [
        Screen::Main,
        Screen::OutTemp,
        Screen::OutHum,
        Screen::OutPress,
        Screen::InTemp,
        Screen::InHum,
        Screen::Co2,
    ];

    /// Quantity graphed on this screen, `None` for the main screen.
    pub const fn quantity(&self) -> Option<Quantity> {
        match self {
            Screen::Main => None,
            Screen::OutTemp => Some(Quantity::OutdoorTemperature),
            Screen::OutHum => Some(Quantity::OutdoorHumidity),
            Screen::OutPress => Some(Quantity::OutdoorPressure),
            Screen::InTemp => Some(Quantity::IndoorTemperature),
            Screen::InHum => Some(Quantity::IndoorHumidity),
            Screen::Co2 => Some(Quantity::Co2),
        }
    }

    const fn index(&self) -> usize {
        *self as usize
    }

    /// Next screen, wrapping from the last back to the main screen.
    pub const fn next(&self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    pub const fn previous(&self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Turning switches screens
    #[default]
    Scrolling,
    /// Turning moves the graph window over the history
    Panning,
    /// Turning moves a cursor over the visible samples
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RadioStatus {
    Receiving,
    Pending,
    #[default]
    NoConnection,
}

impl RadioStatus {
    pub const fn label(&self) -> &'static str {
        match self {
            RadioStatus::Receiving => "receiving",
            RadioStatus::Pending => "pending",
            RadioStatus::NoConnection => "no connection",
        }
    }
}

/// Parts of the main screen that changed since the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dirty {
    pub indoor: bool,
    pub outdoor: bool,
    pub outlook: bool,
    pub connection: bool,
    pub clock: bool,
}

impl Dirty {
    pub const fn any(&self) -> bool {
        self.indoor || self.outdoor || self.outlook || self.connection || self.clock
    }

    /// Return the pending flags and clear them.
    pub fn take(&mut self) -> Self {
        core::mem::take(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UiState {
    pub screen: Screen,
    pub mode: Mode,
    pub radio_status: RadioStatus,
    pub daytime: bool,
    /// Outdoor temperature allows rain rather than snow
    pub summer_temp: bool,
    /// The current screen must be drawn from scratch
    pub setup: bool,
    pub solar: Option<SolarEvents>,
    /// Calendar time as of the last minute rollover
    pub clock: Option<DateTime>,
    /// Monotonic time of the last outdoor packet [ms]
    pub last_contact_ms: Option<u64>,
    pub weather_rating: Option<i8>,
    pub indoor: Option<IndoorReadings>,
    pub outdoor: Option<OutdoorReadings>,
    pub dirty: Dirty,
    pub backlight: bool,
    /// Monotonic time of the last motion or input [ms]
    pub last_activity_ms: u64,
    /// Year-day of the last daylight-saving correction
    pub(crate) dst_applied_on: Option<u16>,
}

impl UiState {
    /// State at boot: main screen, drawn from scratch, backlight on.
    pub fn new(now_ms: u64) -> Self {
        Self {
            setup: true,
            summer_temp: true,
            backlight: true,
            last_activity_ms: now_ms,
            ..Self::default()
        }
    }

    /// Icon for the current rating, time of day and temperature.
    pub fn outlook(&self) -> Option<Outlook> {
        Outlook::from_rating(self.weather_rating?, self.daytime, self.summer_temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screens_wrap_both_ways() {
        assert_eq!(Screen::Main.previous(), Screen::Co2);
        assert_eq!(Screen::Co2.next(), Screen::Main);
        assert_eq!(Screen::OutHum.next(), Screen::OutPress);
        assert_eq!(Screen::Main.quantity(), None);
        assert_eq!(Screen::Co2.quantity(), Some(Quantity::Co2));
    }

    #[test]
    fn test_dirty_take_clears() {
        let mut dirty = Dirty {
            outlook: true,
            ..Dirty::default()
        };
        assert!(dirty.take().outlook);
        assert!(!dirty.any());
    }

    #[test]
    fn test_outlook_needs_a_rating() {
        let mut state = UiState::new(0);
        assert_eq!(state.outlook(), None);
        state.weather_rating = Some(90);
        state.daytime = true;
        assert_eq!(state.outlook(), Some(Outlook::ClearDay));
    }
}
