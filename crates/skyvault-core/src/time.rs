//! Calendar and week-minute arithmetic
//!
//! Samples carry only a weekday/hour/minute stamp, so trend analysis works on
//! minutes modulo one week. The backup header stores a year-day/day-minute
//! pair instead, which lets restore measure outages across day and year
//! boundaries.

pub const MINUTES_PER_HOUR: u32 = 60;
pub const MINUTES_PER_DAY: u32 = 24 * MINUTES_PER_HOUR;
pub const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Cumulative day count before each month of a common year.
const DAYS_BEFORE_MONTH: [u16; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// Week-relative sample stamp.
///
/// `weekday` runs 0..=6 with Monday as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Timestamp {
    pub const fn new(weekday: u8, hour: u8, minute: u8) -> Self {
        Self {
            weekday,
            hour,
            minute,
        }
    }

    /// Build a stamp from minutes since Monday 00:00, wrapping at one week.
    pub const fn from_week_minutes(minutes: u32) -> Self {
        let minutes = minutes % MINUTES_PER_WEEK;
        Self {
            weekday: (minutes / MINUTES_PER_DAY) as u8,
            hour: ((minutes % MINUTES_PER_DAY) / MINUTES_PER_HOUR) as u8,
            minute: (minutes % MINUTES_PER_HOUR) as u8,
        }
    }

    pub const fn week_minutes(&self) -> u32 {
        (self.weekday as u32 * MINUTES_PER_DAY
            + self.hour as u32 * MINUTES_PER_HOUR
            + self.minute as u32)
            % MINUTES_PER_WEEK
    }

    pub const fn minute_of_day(&self) -> u16 {
        minutes_of_day(self.hour, self.minute)
    }

    /// Minutes from `earlier` to `self`, assuming less than a week passed.
    pub const fn minutes_since(&self, earlier: Timestamp) -> u32 {
        (self.week_minutes() + MINUTES_PER_WEEK - earlier.week_minutes()) % MINUTES_PER_WEEK
    }

    pub const fn minus_minutes(&self, minutes: u32) -> Self {
        let back = minutes % MINUTES_PER_WEEK;
        Self::from_week_minutes(self.week_minutes() + MINUTES_PER_WEEK - back)
    }

    pub const fn plus_minutes(&self, minutes: u32) -> Self {
        Self::from_week_minutes(self.week_minutes() + minutes % MINUTES_PER_WEEK)
    }

    pub const fn is_valid(&self) -> bool {
        self.weekday < 7 && self.hour < 24 && self.minute < 60
    }
}

/// Calendar fields as read from the real-time clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,
    /// 1..=12
    pub month: u8,
    /// 1..=31
    pub day: u8,
    /// 0..=6, Monday = 0
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    /// Convert seconds since 1970-01-01 00:00 into calendar fields.
    pub fn from_unix(epoch: u32) -> Self {
        let days = (epoch / SECONDS_PER_DAY) as i64;
        let secs = epoch % SECONDS_PER_DAY;

        // civil-from-days over 400-year eras starting on March 1st
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            // 1970-01-01 was a Thursday
            weekday: ((days + 3) % 7) as u8,
            hour: (secs / 3600) as u8,
            minute: ((secs % 3600) / 60) as u8,
            second: (secs % 60) as u8,
        }
    }

    pub const fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.weekday, self.hour, self.minute)
    }

    pub fn day_of_year(&self) -> u16 {
        day_of_year(self.year, self.month, self.day)
    }

    pub const fn minute_of_day(&self) -> u16 {
        minutes_of_day(self.hour, self.minute)
    }

    /// Field ranges only; does not check the day against the month length.
    pub const fn is_plausible(&self) -> bool {
        self.month >= 1
            && self.month <= 12
            && self.day >= 1
            && self.day <= 31
            && self.weekday < 7
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
    }
}

pub const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub const fn days_in_year(year: u16) -> u16 {
    if is_leap_year(year) { 366 } else { 365 }
}

/// 1-based day of the year. Months outside 1..=12 are clamped.
pub fn day_of_year(year: u16, month: u8, day: u8) -> u16 {
    let month = month.clamp(1, 12);
    let leap_day = u16::from(month > 2 && is_leap_year(year));
    DAYS_BEFORE_MONTH[usize::from(month - 1)] + leap_day + u16::from(day)
}

pub const fn minutes_of_day(hour: u8, minute: u8) -> u16 {
    hour as u16 * 60 + minute as u16
}

/// Minutes from `earlier` to `later` within a day, wrapping at midnight.
pub const fn day_minutes_difference(later: u16, earlier: u16) -> u16 {
    let day = MINUTES_PER_DAY as u16;
    (later % day + day - earlier % day) % day
}

/// Minutes elapsed between two (year-day, day-minute) points.
///
/// A later year-day smaller than the earlier one means the year rolled over;
/// `days_in_earlier_year` sizes that year. Returns `None` when `later` lies
/// before `earlier` on the same or a later day, i.e. the clock went backwards.
pub const fn year_minutes_difference(
    later_year_day: u16,
    later_day_minute: u16,
    earlier_year_day: u16,
    earlier_day_minute: u16,
    days_in_earlier_year: u16,
) -> Option<u32> {
    let later = later_year_day as u32 * MINUTES_PER_DAY + later_day_minute as u32;
    let earlier = earlier_year_day as u32 * MINUTES_PER_DAY + earlier_day_minute as u32;

    if later >= earlier {
        Some(later - earlier)
    } else if later_year_day < earlier_year_day {
        Some(days_in_earlier_year as u32 * MINUTES_PER_DAY + later - earlier)
    } else {
        None
    }
}

/// Decode the big-endian epoch frame sent by the clock-sync link.
pub const fn decode_epoch(frame: [u8; 4]) -> u32 {
    u32::from_be_bytes(frame)
}
