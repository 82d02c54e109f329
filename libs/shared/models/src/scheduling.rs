// libs/shared/models/src/scheduling.rs
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

// ==============================================================================
// WEEKDAYS AND WALL-CLOCK TIMES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
        DayOfWeek::Sunday,
    ];

    pub fn from_date(date: NaiveDate) -> Self {
        date.weekday().into()
    }

    pub fn to_weekday(self) -> Weekday {
        match self {
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
            DayOfWeek::Sunday => Weekday::Sun,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DayOfWeek::Monday => "MONDAY",
            DayOfWeek::Tuesday => "TUESDAY",
            DayOfWeek::Wednesday => "WEDNESDAY",
            DayOfWeek::Thursday => "THURSDAY",
            DayOfWeek::Friday => "FRIDAY",
            DayOfWeek::Saturday => "SATURDAY",
            DayOfWeek::Sunday => "SUNDAY",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for DayOfWeek {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DayOfWeek::ALL
            .into_iter()
            .find(|day| day.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::ValidationError(format!("Unknown day of week '{}'", s)))
    }
}

/// Every weekday that occurs at least once in `[start, end]`.
pub fn weekdays_in_range(start: NaiveDate, end: NaiveDate) -> BTreeSet<DayOfWeek> {
    if end < start {
        return BTreeSet::new();
    }
    if (end - start).num_days() >= 6 {
        return DayOfWeek::ALL.into_iter().collect();
    }

    let mut days = BTreeSet::new();
    let mut cursor = start;
    while cursor <= end {
        days.insert(DayOfWeek::from_date(cursor));
        cursor += Duration::days(1);
    }
    days
}

/// Wall-clock time of day in `HH:mm`, ordered the same way its string form sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(NaiveTime);

impl SlotTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(SlotTime)
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for SlotTime {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // %H:%M alone would also accept "8:00"; the stored form must stay fixed-width.
        if trimmed.len() != 5 {
            return Err(AppError::ValidationError(format!("Time '{}' must be in HH:mm format", s)));
        }
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .map(SlotTime)
            .map_err(|_| AppError::ValidationError(format!("Time '{}' must be in HH:mm format", s)))
    }
}

impl TryFrom<String> for SlotTime {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SlotTime> for String {
    fn from(value: SlotTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

// ==============================================================================
// SCHEDULE AGGREGATE
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub day_of_week: DayOfWeek,
    pub start_time: SlotTime,
    pub end_time: SlotTime,
    pub examination_type: String,
    pub max_patients: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// `UTC`, a `+HH:MM` offset or an IANA `Area/Location` name. Stored for the
    /// authoring side only; booking windows and weekday matching run in UTC.
    pub timezone: String,
    pub is_active: bool,
    pub time_slots: Vec<TimeSlot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps_range(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && self.end_date >= start
    }

    pub fn weekdays(&self) -> BTreeSet<DayOfWeek> {
        self.time_slots.iter().map(|slot| slot.day_of_week).collect()
    }

    pub fn slot(&self, time_slot_id: Uuid) -> Option<&TimeSlot> {
        self.time_slots.iter().find(|slot| slot.id == time_slot_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn slot_time_parses_and_orders_like_its_string() {
        let early: SlotTime = "08:00".parse().unwrap();
        let late: SlotTime = "11:30".parse().unwrap();
        assert!(early < late);
        assert_eq!(late.to_string(), "11:30");
        assert!("8:00".parse::<SlotTime>().is_err());
        assert!("24:00".parse::<SlotTime>().is_err());
        assert!("ab:cd".parse::<SlotTime>().is_err());
    }

    #[test]
    fn slot_time_round_trips_through_json_as_string() {
        let time: SlotTime = serde_json::from_str("\"09:15\"").unwrap();
        assert_eq!(serde_json::to_string(&time).unwrap(), "\"09:15\"");
        assert!(serde_json::from_str::<SlotTime>("\"9:15\"").is_err());
    }

    #[test]
    fn weekday_of_a_known_date() {
        // 2024-12-16 was a Monday
        assert_eq!(DayOfWeek::from_date(date("2024-12-16")), DayOfWeek::Monday);
        assert_eq!(DayOfWeek::from_date(date("2024-12-22")), DayOfWeek::Sunday);
        assert_eq!("wednesday".parse::<DayOfWeek>().unwrap(), DayOfWeek::Wednesday);
    }

    #[test]
    fn weekdays_in_short_and_long_ranges() {
        let short = weekdays_in_range(date("2024-12-16"), date("2024-12-18"));
        assert_eq!(
            short.into_iter().collect::<Vec<_>>(),
            vec![DayOfWeek::Monday, DayOfWeek::Tuesday, DayOfWeek::Wednesday]
        );
        assert_eq!(weekdays_in_range(date("2024-12-16"), date("2024-12-22")).len(), 7);
        assert!(weekdays_in_range(date("2024-12-18"), date("2024-12-16")).is_empty());
    }
}
