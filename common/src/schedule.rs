// Schedule parsing and fire time calculation
//
// Simple triggers fire at their start time and then every interval while
// they repeat; cron triggers fire on each matching instant in their timezone.

use crate::errors::ScheduleError;
use crate::models::{TriggerDefinition, TriggerKind};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Fire time calculator built from a validated TriggerDefinition
#[derive(Debug, Clone)]
pub enum TriggerSchedule {
    Simple {
        start_time: Option<DateTime<Utc>>,
        interval: Option<Duration>,
        repeat_forever: bool,
    },
    Cron {
        schedule: CronSchedule,
        timezone: Tz,
        start_time: Option<DateTime<Utc>>,
    },
}

impl TriggerSchedule {
    /// Validate a definition and build its schedule
    ///
    /// A cron trigger with a blank or unparseable expression, or an unknown
    /// timezone, is rejected. So is a repeating simple trigger without a
    /// positive interval.
    pub fn from_definition(definition: &TriggerDefinition) -> Result<Self, ScheduleError> {
        let invalid = |reason: &str| ScheduleError::InvalidTriggerDefinition {
            trigger_id: definition.id.clone(),
            reason: reason.to_string(),
        };

        if definition.job_identity.trim().is_empty() {
            return Err(invalid("job identity is blank"));
        }

        match definition.kind {
            TriggerKind::Cron => {
                let expression = definition
                    .cron_expression
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default();
                if expression.is_empty() {
                    return Err(invalid("cron expression is blank"));
                }

                let schedule = parse_cron_expression(expression).map_err(|e| invalid(&e.to_string()))?;
                let timezone = match definition.timezone.as_deref() {
                    Some(name) => parse_timezone(name).map_err(|e| invalid(&e.to_string()))?,
                    None => Tz::UTC,
                };

                Ok(TriggerSchedule::Cron {
                    schedule,
                    timezone,
                    start_time: definition.start_time,
                })
            }
            TriggerKind::Simple => {
                let interval = match definition.interval_seconds {
                    Some(0) if definition.repeat_forever => {
                        return Err(invalid("interval must be positive"))
                    }
                    Some(seconds) if seconds > 0 => Some(
                        i64::try_from(seconds)
                            .ok()
                            .and_then(Duration::try_seconds)
                            .ok_or_else(|| invalid("interval is out of range"))?,
                    ),
                    _ if definition.repeat_forever => {
                        return Err(invalid("repeating trigger needs an interval"))
                    }
                    _ => None,
                };

                Ok(TriggerSchedule::Simple {
                    start_time: definition.start_time,
                    interval,
                    repeat_forever: definition.repeat_forever,
                })
            }
        }
    }

    /// First fire time for a trigger loaded at `loaded_at`
    ///
    /// A cron trigger fires on its first matching instant at or after the
    /// later of `loaded_at` and its start time.
    pub fn first_fire_time(&self, loaded_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerSchedule::Simple { start_time, .. } => Some(start_time.unwrap_or(loaded_at)),
            TriggerSchedule::Cron {
                schedule,
                timezone,
                start_time,
            } => {
                let from = start_time.map_or(loaded_at, |start| start.max(loaded_at));
                cron_at_or_after(schedule, timezone, from)
            }
        }
    }

    /// Fire time following the occurrence scheduled at `previous`
    ///
    /// Occurrences that are already in the past at `now` are collapsed: the
    /// result is always later than `now`. Simple triggers keep their phase,
    /// so the result is `previous + k * interval` for the smallest such k.
    pub fn next_fire_time(
        &self,
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match self {
            TriggerSchedule::Simple {
                interval: Some(interval),
                repeat_forever: true,
                ..
            } => {
                let interval_ms = interval.num_milliseconds();
                if interval_ms <= 0 {
                    return None;
                }
                let behind_ms = (now - previous).num_milliseconds();
                let steps = if behind_ms < 0 {
                    1
                } else {
                    behind_ms / interval_ms + 1
                };
                // Out of range ends the schedule
                steps
                    .checked_mul(interval_ms)
                    .and_then(Duration::try_milliseconds)
                    .and_then(|offset| previous.checked_add_signed(offset))
            }
            TriggerSchedule::Simple { .. } => None,
            TriggerSchedule::Cron {
                schedule, timezone, ..
            } => cron_after(schedule, timezone, previous.max(now)),
        }
    }

    pub fn is_repeating(&self) -> bool {
        match self {
            TriggerSchedule::Simple { repeat_forever, .. } => *repeat_forever,
            TriggerSchedule::Cron { .. } => true,
        }
    }
}

fn cron_after(schedule: &CronSchedule, timezone: &Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(timezone))
        .next()
        .map(|next| next.with_timezone(&Utc))
}

fn cron_at_or_after(
    schedule: &CronSchedule,
    timezone: &Tz,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    // `after` is exclusive, so start one second early
    let before = from.checked_sub_signed(Duration::seconds(1))?;
    schedule
        .after(&before.with_timezone(timezone))
        .map(|next| next.with_timezone(&Utc))
        .find(|next| *next >= from)
}

/// Parse and validate a cron expression
///
/// Five-field expressions (minute precision) get a leading seconds field of
/// `0`; six and seven field expressions are passed through.
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };

    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_five_field_cron_expression() {
        let schedule = parse_cron_expression("0 0 * * *").unwrap();
        let next = schedule.after(&at(12, 0, 0)).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_six_field_cron_expression() {
        assert!(parse_cron_expression("*/10 * * * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        let result = parse_cron_expression("not a cron");
        assert!(matches!(result, Err(ScheduleError::InvalidCronExpression { .. })));
    }

    #[test]
    fn test_blank_cron_rejected() {
        let definition = TriggerDefinition::cron("blank", "DigestJob", "   ");
        let err = TriggerSchedule::from_definition(&definition).unwrap_err();
        assert!(err.to_string().contains("blank"));
    }

    #[test]
    fn test_missing_cron_rejected() {
        let mut definition = TriggerDefinition::cron("missing", "DigestJob", "");
        definition.cron_expression = None;
        assert!(TriggerSchedule::from_definition(&definition).is_err());
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let definition =
            TriggerDefinition::cron("tz", "DigestJob", "0 0 * * *").in_timezone("Mars/Olympus");
        assert!(TriggerSchedule::from_definition(&definition).is_err());
    }

    #[test]
    fn test_repeating_simple_needs_interval() {
        let definition = TriggerDefinition::every("zero", "SyncJob", 0);
        assert!(TriggerSchedule::from_definition(&definition).is_err());

        let mut definition = TriggerDefinition::simple("none", "SyncJob");
        definition.repeat_forever = true;
        assert!(TriggerSchedule::from_definition(&definition).is_err());
    }

    #[test]
    fn test_simple_fires_immediately_without_start_time() {
        let schedule =
            TriggerSchedule::from_definition(&TriggerDefinition::simple("once", "SyncJob")).unwrap();
        assert_eq!(schedule.first_fire_time(at(8, 0, 0)), Some(at(8, 0, 0)));
        assert_eq!(schedule.next_fire_time(at(8, 0, 0), at(8, 0, 0)), None);
        assert!(!schedule.is_repeating());
    }

    #[test]
    fn test_simple_uses_start_time() {
        let definition = TriggerDefinition::every("later", "SyncJob", 60).starting_at(at(9, 0, 0));
        let schedule = TriggerSchedule::from_definition(&definition).unwrap();
        assert_eq!(schedule.first_fire_time(at(8, 0, 0)), Some(at(9, 0, 0)));
    }

    #[test]
    fn test_simple_collapses_missed_occurrences_and_keeps_phase() {
        let schedule =
            TriggerSchedule::from_definition(&TriggerDefinition::every("t", "SyncJob", 60)).unwrap();
        // Fell behind by three and a half intervals
        let next = schedule.next_fire_time(at(8, 0, 0), at(8, 3, 30));
        assert_eq!(next, Some(at(8, 4, 0)));
    }

    #[test]
    fn test_cron_honours_timezone() {
        let definition = TriggerDefinition::cron("tz", "DigestJob", "0 0 * * *")
            .in_timezone("Asia/Ho_Chi_Minh");
        let schedule = TriggerSchedule::from_definition(&definition).unwrap();
        // Midnight in UTC+7 is 17:00 UTC the day before
        assert_eq!(schedule.first_fire_time(at(12, 0, 0)), Some(at(17, 0, 0)));
    }

    #[test]
    fn test_interval_out_of_range_rejected() {
        let definition = TriggerDefinition::every("huge", "SyncJob", 10_000_000_000_000_000);
        let err = TriggerSchedule::from_definition(&definition).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let definition = TriggerDefinition::every("beyond-i64", "SyncJob", u64::MAX);
        assert!(TriggerSchedule::from_definition(&definition).is_err());
    }

    #[test]
    fn test_next_fire_beyond_representable_time_ends_schedule() {
        // Valid interval, but the following occurrence is past the last representable instant
        let definition = TriggerDefinition::every("far", "SyncJob", 10_000_000_000_000);
        let schedule = TriggerSchedule::from_definition(&definition).unwrap();
        assert_eq!(schedule.next_fire_time(at(8, 0, 0), at(8, 0, 0)), None);
    }

    #[test]
    fn test_cron_waits_for_start_time() {
        let start = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap();
        let definition =
            TriggerDefinition::cron("later", "DigestJob", "0 0 * * *").starting_at(start);
        let schedule = TriggerSchedule::from_definition(&definition).unwrap();
        // The start instant itself matches and is included
        assert_eq!(schedule.first_fire_time(at(12, 0, 0)), Some(start));

        let start = Utc.with_ymd_and_hms(2027, 1, 1, 6, 0, 0).unwrap();
        let definition =
            TriggerDefinition::cron("later", "DigestJob", "0 0 * * *").starting_at(start);
        let schedule = TriggerSchedule::from_definition(&definition).unwrap();
        assert_eq!(
            schedule.first_fire_time(at(12, 0, 0)),
            Some(Utc.with_ymd_and_hms(2027, 1, 2, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cron_past_start_time_uses_load_time() {
        let definition = TriggerDefinition::cron("c", "DigestJob", "0 0 * * *")
            .starting_at(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        let schedule = TriggerSchedule::from_definition(&definition).unwrap();
        assert_eq!(
            schedule.first_fire_time(at(12, 0, 0)),
            Some(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cron_loaded_on_matching_instant_fires_then() {
        let schedule =
            TriggerSchedule::from_definition(&TriggerDefinition::cron("c", "J", "0 0 * * *")).unwrap();
        let midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(schedule.first_fire_time(midnight), Some(midnight));
        // Half a second past the match is already too late for it
        let late = midnight + Duration::milliseconds(500);
        assert_eq!(
            schedule.first_fire_time(late),
            Some(Utc.with_ymd_and_hms(2026, 3, 16, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cron_next_skips_past_occurrences() {
        let schedule =
            TriggerSchedule::from_definition(&TriggerDefinition::cron("c", "J", "0 * * * *")).unwrap();
        assert_eq!(schedule.next_fire_time(at(8, 0, 0), at(10, 30, 0)), Some(at(11, 0, 0)));
    }
}
