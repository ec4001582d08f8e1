use std::{fmt, str::FromStr};

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{DraftField, ValidationError};

/// what has to be done to turn the alarm off
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmType {
    Standard,
    #[serde(rename = "NFC")]
    Nfc,
    Payment,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmSound {
    Standard,
    Radio,
    Siren,
}

impl AlarmType {
    pub const ALL: [Self; 3] = [Self::Standard, Self::Nfc, Self::Payment];
}

impl AlarmSound {
    pub const ALL: [Self; 3] = [Self::Standard, Self::Radio, Self::Siren];
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Standard => stringify!(Standard),
                Self::Nfc => "NFC",
                Self::Payment => stringify!(Payment),
            }
        )
    }
}

impl fmt::Display for AlarmSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Standard => stringify!(Standard),
                Self::Radio => stringify!(Radio),
                Self::Siren => stringify!(Siren),
            }
        )
    }
}

/// returned when a string does not name one of the fixed options
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} {value:?}")]
pub struct ParseOptionError {
    what: &'static str,
    value: String,
}

impl FromStr for AlarmType {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseOptionError {
                what: "alarm type",
                value: s.to_string(),
            })
    }
}

impl FromStr for AlarmSound {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sound| sound.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseOptionError {
                what: "alarm sound",
                value: s.to_string(),
            })
    }
}

/// Days of the week an alarm repeats on, Monday first.
///
/// No day selected is allowed: the alarm is kept and the native side
/// treats it as a one-shot for the next occurrence of its time.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct Days(pub [bool; 7]);

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

impl Days {
    pub const NONE: Self = Self([false; 7]);
    pub const EVERY_DAY: Self = Self([true; 7]);
    pub const WEEKDAYS: Self = Self([true, true, true, true, true, false, false]);
    pub const WEEKENDS: Self = Self([false, false, false, false, false, true, true]);

    #[must_use]
    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_monday() as usize]
    }

    pub fn set(&mut self, day: Weekday, on: bool) {
        self.0[day.num_days_from_monday() as usize] = on;
    }

    /// flips a single day, like tapping it in the day picker
    pub fn toggle(&mut self, day: Weekday) {
        let i = day.num_days_from_monday() as usize;
        self.0[i] = !self.0[i];
    }

    pub fn selected(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEK.into_iter().filter(|day| self.contains(*day))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|d| *d)
    }
}

impl From<[bool; 7]> for Days {
    fn from(days: [bool; 7]) -> Self {
        Self(days)
    }
}

impl fmt::Display for Days {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<String> = self.selected().map(|day| day.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

impl FromStr for Days {
    type Err = ParseOptionError;

    /// accepts `none`, `every`/`daily`, `weekdays`, `weekends` or a comma
    /// separated list of weekday names (`mon,wed,fri`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => return Ok(Self::NONE),
            "every" | "daily" => return Ok(Self::EVERY_DAY),
            "weekdays" => return Ok(Self::WEEKDAYS),
            "weekends" => return Ok(Self::WEEKENDS),
            _ => {}
        }
        let mut days = Self::NONE;
        for part in s.split(',') {
            let day = part.trim().parse::<Weekday>().map_err(|_| ParseOptionError {
                what: "weekday",
                value: part.to_string(),
            })?;
            days.set(day, true);
        }
        Ok(days)
    }
}

/// represnts a stored alarm
///
/// this is the exact shape that is written to the key store, so field
/// names must not change
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Alarm {
    #[serde(rename = "type")]
    pub kind: AlarmType,
    pub sound: AlarmSound,
    pub id: u64,
    pub hour: u8,
    pub minute: u8,
    pub days: Days,
    #[serde(default = "always_true")]
    pub enabled: bool,
}

#[inline]
#[must_use]
pub const fn always_true() -> bool {
    true
}

fn check_time(hour: u8, minute: u8, fields: &mut Vec<DraftField>) {
    if hour > 23 {
        fields.push(DraftField::Hour);
    }
    if minute > 59 {
        fields.push(DraftField::Minute);
    }
}

impl Alarm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut fields = Vec::new();
        check_time(self.hour, self.minute, &mut fields);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields })
        }
    }

    /// the key this alarm is stored under
    #[must_use]
    pub fn key(&self) -> String {
        self.id.to_string()
    }
}

impl fmt::Display for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {:02}:{:02} [{}] type: {} sound: {}{}",
            self.id,
            self.hour,
            self.minute,
            self.days,
            self.kind,
            self.sound,
            if self.enabled { "" } else { " (disabled)" }
        )
    }
}

/// an alarm as the edit form holds it before saving
///
/// `None` for type or sound means nothing was picked yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmDraft {
    pub kind: Option<AlarmType>,
    pub sound: Option<AlarmSound>,
    pub hour: u8,
    pub minute: u8,
    pub days: Days,
    pub time_confirmed: bool,
}

impl Default for AlarmDraft {
    fn default() -> Self {
        let now = chrono::Local::now().naive_local().time();
        Self {
            kind: None,
            sound: None,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            days: Days::NONE,
            time_confirmed: false,
        }
    }
}

impl AlarmDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// prefills the form from an existing alarm, its time counts as chosen
    #[must_use]
    pub const fn from_alarm(alarm: &Alarm) -> Self {
        Self {
            kind: Some(alarm.kind),
            sound: Some(alarm.sound),
            hour: alarm.hour,
            minute: alarm.minute,
            days: alarm.days,
            time_confirmed: true,
        }
    }

    /// what the time picker does on confirm
    pub fn set_time(&mut self, time: NaiveTime) {
        self.hour = time.hour() as u8;
        self.minute = time.minute() as u8;
        self.time_confirmed = true;
    }

    /// Checks every field and reports all the ones that are missing or out of
    /// range at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut fields = Vec::new();
        if self.kind.is_none() {
            fields.push(DraftField::Type);
        }
        if self.sound.is_none() {
            fields.push(DraftField::Sound);
        }
        if !self.time_confirmed {
            fields.push(DraftField::Time);
        }
        check_time(self.hour, self.minute, &mut fields);
        if fields.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields })
        }
    }

    /// Builds the record for a freshly allocated id. New alarms are always
    /// enabled.
    pub fn into_alarm(self, id: u64) -> Result<Alarm, ValidationError> {
        self.validate()?;
        match (self.kind, self.sound) {
            (Some(kind), Some(sound)) => Ok(Alarm {
                kind,
                sound,
                id,
                hour: self.hour,
                minute: self.minute,
                days: self.days,
                enabled: true,
            }),
            // validate already rejected these
            (kind, _) => Err(ValidationError {
                fields: vec![if kind.is_none() {
                    DraftField::Type
                } else {
                    DraftField::Sound
                }],
            }),
        }
    }
}

/// Fields to replace on an existing alarm. The id is never part of a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmPatch {
    pub kind: Option<AlarmType>,
    pub sound: Option<AlarmSound>,
    pub hour: Option<u8>,
    pub minute: Option<u8>,
    pub days: Option<Days>,
    pub enabled: Option<bool>,
}

impl AlarmPatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn hour(mut self, hour: u8) -> Self {
        self.hour = Some(hour);
        self
    }

    #[must_use]
    pub const fn minute(mut self, minute: u8) -> Self {
        self.minute = Some(minute);
        self
    }

    #[must_use]
    pub fn time(self, time: NaiveTime) -> Self {
        self.hour(time.hour() as u8).minute(time.minute() as u8)
    }

    #[must_use]
    pub const fn kind(mut self, kind: AlarmType) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub const fn sound(mut self, sound: AlarmSound) -> Self {
        self.sound = Some(sound);
        self
    }

    #[must_use]
    pub const fn days(mut self, days: Days) -> Self {
        self.days = Some(days);
        self
    }

    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// An edit-screen save replaces every field the form shows. A draft that
    /// does not validate cannot become a patch.
    pub fn from_draft(draft: &AlarmDraft) -> Result<Self, ValidationError> {
        draft.validate()?;
        Ok(Self {
            kind: draft.kind,
            sound: draft.sound,
            hour: Some(draft.hour),
            minute: Some(draft.minute),
            days: Some(draft.days),
            enabled: None,
        })
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.sound.is_none()
            && self.hour.is_none()
            && self.minute.is_none()
            && self.days.is_none()
            && self.enabled.is_none()
    }

    /// merges the patch onto `alarm`, keeping its id
    #[must_use]
    pub fn apply(&self, alarm: &Alarm) -> Alarm {
        Alarm {
            kind: self.kind.unwrap_or(alarm.kind),
            sound: self.sound.unwrap_or(alarm.sound),
            id: alarm.id,
            hour: self.hour.unwrap_or(alarm.hour),
            minute: self.minute.unwrap_or(alarm.minute),
            days: self.days.unwrap_or(alarm.days),
            enabled: self.enabled.unwrap_or(alarm.enabled),
        }
    }
}
