//! Solar, daylight-saving and weather-outlook helpers
//!
//! Pure functions over calendar values. Weekdays follow [`crate::time`]:
//! Monday is 0 and Sunday is 6.

use core::f32::consts::PI;

use crate::config::{Location, WeatherWeights};
use crate::time::day_of_year;

const PASCAL_TO_MM_HG: f32 = 0.007_500_62;
const SUNDAY: u8 = 6;

/// Convert a pressure in pascals to whole millimetres of mercury.
pub fn to_mm_hg(pascals: f32) -> u16 {
    let mm_hg = libm::roundf(pascals * PASCAL_TO_MM_HG);
    mm_hg.clamp(0.0, u16::MAX as f32) as u16
}

/// Combine the normalized trend ratings of pressure, humidity and
/// temperature into one weather rating in `-100..=100`.
pub fn find_weather_rating(
    pressure_rate: i8,
    humidity_rate: i8,
    temperature_rate: i8,
    weights: &WeatherWeights,
) -> i8 {
    let rating = weights.pressure * f32::from(pressure_rate)
        + weights.humidity * f32::from(humidity_rate)
        + weights.temperature * f32::from(temperature_rate);
    rating.clamp(-100.0, 100.0) as i8
}

/// Date of the most recent Sunday, which is `day` itself on a Sunday.
/// May be zero or negative early in the month.
fn last_sunday_on_or_before(day: u8, weekday: u8) -> i16 {
    let days_since_sunday = (weekday % 7 + 1) % 7;
    i16::from(day) - i16::from(days_since_sunday)
}

/// European summer time: from the last Sunday of March to the last Sunday of
/// October. Switching hours are not taken into account.
pub fn is_dst(month: u8, day: u8, weekday: u8) -> bool {
    match month {
        4..=9 => true,
        // the last Sunday of a 31-day month falls on the 25th or later
        3 => last_sunday_on_or_before(day, weekday) >= 25,
        10 => last_sunday_on_or_before(day, weekday) < 25,
        _ => false,
    }
}

/// Hour correction to apply to the clock at a DST switch, if any.
pub fn dst_correction(month: u8, day: u8, weekday: u8, hour: u8) -> Option<i8> {
    if weekday != SUNDAY || day < 25 {
        return None;
    }
    match (month, hour) {
        (3, 3) => Some(1),
        (10, 4) => Some(-1),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolarEvents {
    /// Minutes of day
    pub sunrise: u16,
    /// Minutes of day
    pub sunset: u16,
}

impl SolarEvents {
    pub const fn is_daytime(&self, minute_of_day: u16) -> bool {
        minute_of_day >= self.sunrise && minute_of_day < self.sunset
    }
}

/// Approximate local sunrise and sunset for a date.
///
/// Day length follows a cosine between the configured solstice lengths; solar
/// noon is corrected by the equation of time and the station's offset from
/// its time-zone meridian.
pub fn solar_events(location: &Location, year: u16, month: u8, day: u8, weekday: u8) -> SolarEvents {
    let year_day = f32::from(day_of_year(year, month, day));

    let amplitude = 30.0
        * f32::from(
            location
                .longest_day_hours
                .saturating_sub(location.shortest_day_hours),
        );
    let daylight = -amplitude * libm::cosf(2.0 * PI / 365.0 * (year_day + 10.0)) + 720.0;

    let b = 2.0 * PI / 365.0 * (year_day - 81.0);
    let equation_of_time = 9.87 * libm::sinf(2.0 * b) - 7.53 * libm::cosf(b) - 1.5 * libm::sinf(b);

    let meridian_offset = 60.0 * (f32::from(location.gmt_offset_hours) - location.longitude / 15.0);
    let dst = if is_dst(month, day, weekday) { 60.0 } else { 0.0 };
    let solar_noon = 720.0 + meridian_offset + dst - equation_of_time;

    let half = daylight / 2.0;
    SolarEvents {
        sunrise: libm::roundf(solar_noon - half).clamp(0.0, 1439.0) as u16,
        sunset: libm::roundf(solar_noon + half).clamp(0.0, 1439.0) as u16,
    }
}

/// Temperatures at or above -1 °C use the summer variants of precipitation.
pub fn is_summer_temperature(celsius: f32) -> bool {
    celsius >= -1.0
}

/// Weather icon chosen from a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outlook {
    ClearDay,
    ClearNight,
    SunnyDay,
    SunnyNight,
    FairDay,
    FairNight,
    CloudyDay,
    CloudyNight,
    Overcast,
    SuddenRain,
    SuddenSnow,
    Rain,
    Snow,
    Shower,
    Blizzard,
    Thunderstorm,
}

impl Outlook {
    /// Ratings between -19 and 19 keep whatever icon is shown.
    pub fn from_rating(rating: i8, daytime: bool, summer: bool) -> Option<Self> {
        let pick = |day: Self, night: Self| if daytime { day } else { night };
        let season = |warm: Self, cold: Self| if summer { warm } else { cold };
        match rating {
            80..=i8::MAX => Some(pick(Self::ClearDay, Self::ClearNight)),
            60..=79 => Some(pick(Self::SunnyDay, Self::SunnyNight)),
            40..=59 => Some(pick(Self::FairDay, Self::FairNight)),
            20..=39 => Some(pick(Self::CloudyDay, Self::CloudyNight)),
            -36..=-20 => Some(Self::Overcast),
            -53..=-37 => Some(season(Self::SuddenRain, Self::SuddenSnow)),
            -69..=-54 => Some(season(Self::Rain, Self::Snow)),
            -85..=-70 => Some(season(Self::Shower, Self::Blizzard)),
            i8::MIN..=-86 => Some(season(Self::Thunderstorm, Self::Blizzard)),
            _ => None,
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::ClearDay | Self::ClearNight => "clear",
            Self::SunnyDay | Self::SunnyNight => "sunny",
            Self::FairDay | Self::FairNight => "fair",
            Self::CloudyDay | Self::CloudyNight => "cloudy",
            Self::Overcast => "overcast",
            Self::SuddenRain => "sudden rain",
            Self::SuddenSnow => "sudden snow",
            Self::Rain => "rain",
            Self::Snow => "snow",
            Self::Shower => "shower",
            Self::Blizzard => "blizzard",
            Self::Thunderstorm => "thunderstorm",
        }
    }
}
