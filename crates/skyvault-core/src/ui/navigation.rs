//! Encoder navigation and clock-driven state updates

use super::InputEvent;
use super::state::{Mode, RadioStatus, Screen, UiState};
use crate::config::{DisplayConfig, Location};
use crate::sensors::{IndoorReadings, OutdoorReadings};
use crate::solar::{dst_correction, is_summer_temperature, solar_events};
use crate::time::DateTime;

/// What the frame loop has to do after an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    None,
    /// Draw the current screen from scratch
    Redraw,
    /// Move the graph window by this many samples
    Pan(i16),
    /// Move the graph cursor by this many samples
    MoveCursor(i16),
}

/// Result of a minute rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteChange {
    /// A new calendar day started, solar events were recomputed
    pub new_day: bool,
    /// Hours to add to the real-time clock for daylight saving
    pub dst_correction: Option<i8>,
}

impl UiState {
    /// Apply an encoder event. `head_count` is the history length of the
    /// vaults; without history there is nothing to scroll to.
    pub fn handle_input(&mut self, event: InputEvent, head_count: usize, display: &DisplayConfig) -> UiCommand {
        let pannable = head_count > usize::from(display.graph_width);

        match (self.mode, event) {
            (Mode::Scrolling, InputEvent::TurnLeft { .. } | InputEvent::TurnRight { .. }) => {
                if head_count == 0 {
                    return UiCommand::None;
                }
                self.screen = if event.direction() < 0 {
                    self.screen.previous()
                } else {
                    self.screen.next()
                };
                self.enter(Mode::Scrolling)
            }
            (Mode::Scrolling, InputEvent::Click) if self.screen != Screen::Main => {
                if pannable {
                    self.enter(Mode::Panning)
                } else if head_count > usize::from(display.cursor_box) {
                    self.enter(Mode::Cursor)
                } else {
                    UiCommand::None
                }
            }
            (Mode::Scrolling, _) => UiCommand::None,

            (Mode::Panning, InputEvent::TurnLeft { fast } | InputEvent::TurnRight { fast }) => {
                let step = if fast { display.pan_fast } else { display.pan_slow };
                UiCommand::Pan(step as i16 * event.direction())
            }
            (Mode::Panning, InputEvent::Click) => self.enter(Mode::Cursor),
            (Mode::Panning, InputEvent::Hold) => self.enter(Mode::Scrolling),

            (Mode::Cursor, InputEvent::TurnLeft { fast } | InputEvent::TurnRight { fast }) => {
                let step = if fast { display.cursor_fast } else { display.cursor_slow };
                UiCommand::MoveCursor(step as i16 * event.direction())
            }
            (Mode::Cursor, InputEvent::Click) if pannable => self.enter(Mode::Panning),
            (Mode::Cursor, InputEvent::Click | InputEvent::Hold) => self.enter(Mode::Scrolling),
        }
    }

    fn enter(&mut self, mode: Mode) -> UiCommand {
        self.mode = mode;
        self.setup = true;
        UiCommand::Redraw
    }

    /// Back to the main screen. Returns whether anything changed.
    pub fn return_home(&mut self) -> bool {
        if self.screen == Screen::Main && self.mode == Mode::Scrolling {
            return false;
        }
        self.screen = Screen::Main;
        self.mode = Mode::Scrolling;
        self.setup = true;
        true
    }

    /// Track the calendar clock. Returns `None` while the minute is unchanged.
    pub fn on_minute(&mut self, now: &DateTime, location: &Location) -> Option<MinuteChange> {
        let previous = self.clock;
        if previous.is_some_and(|clock| clock.minute == now.minute && clock.hour == now.hour) {
            return None;
        }
        self.clock = Some(*now);
        self.dirty.clock = true;

        let new_day = previous.is_none_or(|clock| clock.weekday != now.weekday || clock.day != now.day);
        if new_day || self.solar.is_none() {
            self.solar = Some(solar_events(location, now.year, now.month, now.day, now.weekday));
        }

        if let Some(solar) = self.solar {
            let daytime = solar.is_daytime(now.minute_of_day());
            if daytime != self.daytime {
                self.daytime = daytime;
                self.dirty.outlook = true;
            }
        }

        let year_day = now.day_of_year();
        let dst = dst_correction(now.month, now.day, now.weekday, now.hour)
            .filter(|_| self.dst_applied_on != Some(year_day));
        if dst.is_some() {
            self.dst_applied_on = Some(year_day);
        }

        Some(MinuteChange {
            new_day,
            dst_correction: dst,
        })
    }

    /// Re-derive the radio status from the time since the last packet.
    /// Returns whether it changed.
    pub fn refresh_radio_status(&mut self, now_ms: u64, display: &DisplayConfig) -> bool {
        let status = match self.last_contact_ms {
            Some(contact) => {
                let silent = now_ms.saturating_sub(contact);
                if silent < u64::from(display.receive_threshold_ms) {
                    RadioStatus::Receiving
                } else if silent >= u64::from(display.pending_threshold_ms) {
                    RadioStatus::NoConnection
                } else {
                    RadioStatus::Pending
                }
            }
            None => RadioStatus::NoConnection,
        };

        if status == self.radio_status {
            return false;
        }
        self.radio_status = status;
        self.dirty.connection = true;
        true
    }

    pub fn record_outdoor(&mut self, readings: OutdoorReadings, now_ms: u64) {
        self.last_contact_ms = Some(now_ms);
        let summer = is_summer_temperature(readings.temperature_c);
        if summer != self.summer_temp {
            self.summer_temp = summer;
            self.dirty.outlook = true;
        }
        self.outdoor = Some(readings);
        self.dirty.outdoor = true;
    }

    pub fn record_indoor(&mut self, readings: IndoorReadings) {
        self.indoor = Some(readings);
        self.dirty.indoor = true;
    }

    pub fn set_weather_rating(&mut self, rating: Option<i8>) {
        if rating != self.weather_rating {
            self.weather_rating = rating;
            self.dirty.outlook = true;
        }
    }

    /// Backlight handling for one presence poll.
    ///
    /// Activity turns the light on; after `idle_timeout_ms` without activity
    /// it goes off and the display returns to the main screen. Returns the
    /// new backlight state when it changed.
    pub fn on_presence(&mut self, active: bool, now_ms: u64, display: &DisplayConfig) -> Option<bool> {
        let idle = now_ms.saturating_sub(self.last_activity_ms);
        if self.backlight && !active && idle > u64::from(display.idle_timeout_ms) {
            self.backlight = false;
            self.return_home();
            return Some(false);
        }
        if active {
            self.last_activity_ms = now_ms;
            if !self.backlight {
                self.backlight = true;
                return Some(true);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;

    const LEFT: InputEvent = InputEvent::TurnLeft { fast: false };
    const RIGHT: InputEvent = InputEvent::TurnRight { fast: false };
    const RIGHT_FAST: InputEvent = InputEvent::TurnRight { fast: true };

    fn display() -> DisplayConfig {
        StationConfig::default().display
    }

    fn state() -> UiState {
        let mut state = UiState::new(0);
        state.setup = false;
        state
    }

    #[test]
    fn test_scrolling_needs_history() {
        let mut state = state();
        assert_eq!(state.handle_input(RIGHT, 0, &display()), UiCommand::None);
        assert_eq!(state.screen, Screen::Main);

        assert_eq!(state.handle_input(LEFT, 5, &display()), UiCommand::Redraw);
        assert_eq!(state.screen, Screen::Co2);
        assert!(state.setup);
        assert_eq!(state.handle_input(RIGHT, 5, &display()), UiCommand::Redraw);
        assert_eq!(state.screen, Screen::Main);
    }

    #[test]
    fn test_click_picks_mode_by_history_length() {
        let mut state = state();
        assert_eq!(state.handle_input(InputEvent::Click, 500, &display()), UiCommand::None);

        state.screen = Screen::OutPress;
        assert_eq!(state.handle_input(InputEvent::Click, 16, &display()), UiCommand::None);
        assert_eq!(state.handle_input(InputEvent::Click, 17, &display()), UiCommand::Redraw);
        assert_eq!(state.mode, Mode::Cursor);

        state.mode = Mode::Scrolling;
        state.handle_input(InputEvent::Click, 241, &display());
        assert_eq!(state.mode, Mode::Panning);
    }

    #[test]
    fn test_panning_and_cursor_steps() {
        let mut state = state();
        state.screen = Screen::InTemp;
        state.mode = Mode::Panning;
        assert_eq!(state.handle_input(LEFT, 600, &display()), UiCommand::Pan(-20));
        assert_eq!(state.handle_input(RIGHT_FAST, 600, &display()), UiCommand::Pan(50));

        assert_eq!(state.handle_input(InputEvent::Click, 600, &display()), UiCommand::Redraw);
        assert_eq!(state.mode, Mode::Cursor);
        assert_eq!(state.handle_input(LEFT, 600, &display()), UiCommand::MoveCursor(-1));
        assert_eq!(state.handle_input(RIGHT_FAST, 600, &display()), UiCommand::MoveCursor(10));

        // back to panning while the history is wider than the graph
        state.handle_input(InputEvent::Click, 600, &display());
        assert_eq!(state.mode, Mode::Panning);
        state.handle_input(InputEvent::Hold, 600, &display());
        assert_eq!(state.mode, Mode::Scrolling);
        assert_eq!(state.screen, Screen::InTemp);
    }

    #[test]
    fn test_cursor_click_leaves_short_history() {
        let mut state = state();
        state.screen = Screen::Co2;
        state.mode = Mode::Cursor;
        state.handle_input(InputEvent::Click, 100, &display());
        assert_eq!(state.mode, Mode::Scrolling);
    }

    #[test]
    fn test_radio_status_thresholds() {
        let display = display();
        let mut state = state();
        assert!(!state.refresh_radio_status(10, &display));
        assert_eq!(state.radio_status, RadioStatus::NoConnection);

        state.record_outdoor(OutdoorReadings::default(), 1_000);
        assert!(state.refresh_radio_status(1_999, &display));
        assert_eq!(state.radio_status, RadioStatus::Receiving);
        assert!(state.refresh_radio_status(2_000, &display));
        assert_eq!(state.radio_status, RadioStatus::Pending);
        assert!(!state.refresh_radio_status(300_999, &display));
        assert!(state.refresh_radio_status(301_000, &display));
        assert_eq!(state.radio_status, RadioStatus::NoConnection);
        assert!(state.dirty.connection);
    }

    #[test]
    fn test_minute_rollover_updates_daytime_once_per_minute() {
        let location = StationConfig::default().location;
        let mut state = state();
        // 2023-06-21 10:00 UTC is a Wednesday
        let morning = DateTime::from_unix(1_687_341_600);
        let change = state.on_minute(&morning, &location).unwrap();
        assert!(change.new_day);
        assert!(state.daytime);
        assert!(state.solar.is_some());
        assert_eq!(state.on_minute(&morning, &location), None);

        let night = DateTime::from_unix(1_687_341_600 + 13 * 3600);
        let change = state.on_minute(&night, &location).unwrap();
        assert!(!change.new_day);
        assert!(!state.daytime);
    }

    #[test]
    fn test_dst_correction_is_requested_once() {
        let location = StationConfig::default().location;
        let mut state = state();
        // 2023-10-29 is the last Sunday of October
        let switch = DateTime::from_unix(1_698_552_000);
        assert_eq!((switch.month, switch.day, switch.weekday, switch.hour), (10, 29, 6, 4));

        let change = state.on_minute(&switch, &location).unwrap();
        assert_eq!(change.dst_correction, Some(-1));

        // the clock still reads 04:xx until the correction is applied
        let again = DateTime::from_unix(1_698_552_000 + 60);
        let change = state.on_minute(&again, &location).unwrap();
        assert_eq!(change.dst_correction, None);
    }

    #[test]
    fn test_idle_timeout_returns_home() {
        let display = display();
        let mut state = state();
        state.screen = Screen::OutHum;
        state.mode = Mode::Cursor;

        assert_eq!(state.on_presence(false, 60_000, &display), None);
        assert_eq!(state.on_presence(false, 60_001, &display), Some(false));
        assert_eq!((state.screen, state.mode), (Screen::Main, Mode::Scrolling));
        assert!(state.setup);

        assert_eq!(state.on_presence(true, 70_000, &display), Some(true));
        assert_eq!(state.on_presence(false, 70_500, &display), None);
    }
}
