//! Turns an alarm into the concrete wake-ups the OS is asked for.
//!
//! One weekly trigger per selected day. An alarm with no day selected still
//! gets a single one-shot trigger at the next occurrence of its time.

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::alarm::{Alarm, Days};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub weekday: Weekday,
    pub fire_at: NaiveDateTime,
    /// weekly if true, otherwise fires once
    pub repeating: bool,
    /// `weekday * 10000 + hour * 100 + minute`, Monday is 1
    pub request_code: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPlan {
    pub alarm_id: u64,
    pub triggers: Vec<Trigger>,
}

#[must_use]
pub fn request_code(weekday: Weekday, hour: u8, minute: u8) -> u32 {
    weekday.number_from_monday() * 10000 + u32::from(hour) * 100 + u32::from(minute)
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

impl TriggerPlan {
    /// Plans the triggers for `alarm` as seen at local wall-clock time `now`.
    #[must_use]
    pub fn for_alarm(alarm: &Alarm, now: NaiveDateTime) -> Self {
        Self::new(alarm.id, alarm.hour, alarm.minute, alarm.days, now)
    }

    /// A trigger falling in the same minute as `now` is kept, only one that is
    /// already behind `now` rolls forward.
    #[must_use]
    pub fn new(alarm_id: u64, hour: u8, minute: u8, days: Days, now: NaiveDateTime) -> Self {
        let now = truncate_to_minute(now);
        let time = NaiveTime::from_hms_opt(u32::from(hour), u32::from(minute), 0)
            .unwrap_or(NaiveTime::MIN);
        let today = now.date().and_time(time);

        let triggers = if days.is_empty() {
            let fire_at = if now > today {
                today + Duration::days(1)
            } else {
                today
            };
            vec![Trigger {
                weekday: fire_at.weekday(),
                fire_at,
                repeating: false,
                request_code: request_code(fire_at.weekday(), hour, minute),
            }]
        } else {
            days.selected()
                .map(|weekday| {
                    let ahead = (i64::from(weekday.num_days_from_monday())
                        - i64::from(now.weekday().num_days_from_monday()))
                    .rem_euclid(7);
                    let mut fire_at = today + Duration::days(ahead);
                    if now > fire_at {
                        fire_at += Duration::weeks(1);
                    }
                    Trigger {
                        weekday,
                        fire_at,
                        repeating: true,
                        request_code: request_code(weekday, hour, minute),
                    }
                })
                .collect()
        };

        Self { alarm_id, triggers }
    }

    /// the soonest wake-up in the plan
    #[must_use]
    pub fn next_fire(&self) -> Option<NaiveDateTime> {
        self.triggers.iter().map(|t| t.fire_at).min()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::alarm::{AlarmSound, AlarmType};

    fn alarm(hour: u8, minute: u8, days: Days) -> Alarm {
        Alarm {
            kind: AlarmType::Standard,
            sound: AlarmSound::Siren,
            id: 1,
            hour,
            minute,
            days,
            enabled: true,
        }
    }

    // 2024-01-03 is a Wednesday
    fn wednesday(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    #[test]
    fn one_trigger_per_selected_day() {
        let plan = TriggerPlan::for_alarm(
            &alarm(7, 30, "mon,wed,fri".parse().unwrap()),
            wednesday(6, 0, 0),
        );
        let fire: Vec<_> = plan.triggers.iter().map(|t| t.fire_at).collect();
        assert_eq!(
            fire,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 8).unwrap().and_hms_opt(7, 30, 0).unwrap(),
                wednesday(7, 30, 0),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap().and_hms_opt(7, 30, 0).unwrap(),
            ]
        );
        assert!(plan.triggers.iter().all(|t| t.repeating));
        assert_eq!(plan.next_fire(), Some(wednesday(7, 30, 0)));
    }

    #[test]
    fn passed_day_rolls_a_week() {
        let plan = TriggerPlan::for_alarm(&alarm(7, 30, "wed".parse().unwrap()), wednesday(8, 0, 0));
        assert_eq!(
            plan.next_fire(),
            Some(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap().and_hms_opt(7, 30, 0).unwrap())
        );
    }

    #[test]
    fn same_minute_is_not_rolled() {
        let plan = TriggerPlan::for_alarm(&alarm(7, 30, Days::NONE), wednesday(7, 30, 45));
        assert_eq!(plan.next_fire(), Some(wednesday(7, 30, 0)));
    }

    #[test]
    fn no_days_is_a_one_shot_tomorrow_when_passed() {
        let plan = TriggerPlan::for_alarm(&alarm(5, 0, Days::NONE), wednesday(9, 0, 0));
        assert_eq!(plan.triggers.len(), 1);
        let trigger = plan.triggers[0];
        assert!(!trigger.repeating);
        assert_eq!(trigger.weekday, Weekday::Thu);
        assert_eq!(trigger.request_code, 40500);
    }

    #[test]
    fn request_code_layout() {
        assert_eq!(request_code(Weekday::Mon, 7, 30), 10730);
        assert_eq!(request_code(Weekday::Sun, 23, 59), 72359);
    }
}
