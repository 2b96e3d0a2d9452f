// Step Start Time
// Parses a step's start-at setting and computes when the step may begin

use crate::model::{StartAtType, Step};

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use thiserror::Error;

/// Malformed start-at setting. The step then starts without waiting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid start time '{0}': expected HH:MM[:SS] with an optional leading '+'")]
pub struct StartAtError(pub String);

/// Parsed start-at setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Time of day
    At(NaiveTime),
    /// Offset from the anchor selected by `StartAtType`
    After(Duration),
}

impl StartAt {
    pub fn parse(text: &str) -> Result<Self, StartAtError> {
        let invalid = || StartAtError(text.to_string());

        let trimmed = text.trim();
        let (relative, clock) = match trimmed.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let parts = clock
            .split(':')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        let (hours, minutes, seconds) = match parts.as_slice() {
            [h, m] => (*h, *m, 0),
            [h, m, s] => (*h, *m, *s),
            _ => return Err(invalid()),
        };

        if relative {
            let total = i64::from(hours) * 3600 + i64::from(minutes) * 60 + i64::from(seconds);
            Ok(StartAt::After(Duration::seconds(total)))
        } else {
            NaiveTime::from_hms_opt(hours, minutes, seconds)
                .map(StartAt::At)
                .ok_or_else(invalid)
        }
    }
}

/// When `steps[index]` may start, or `None` if it starts at once.
///
/// Relative times count from the anchor `StartAtType` selects among the
/// earlier steps, falling back to `now` when that step never ran. Times of
/// day are read in `now`'s time zone. A time already reached is moved one
/// day ahead when the step waits for the next day.
pub fn start_deadline<Tz: TimeZone>(
    steps: &[Step],
    index: usize,
    run_started: DateTime<Utc>,
    now: DateTime<Tz>,
) -> Result<Option<DateTime<Utc>>, StartAtError> {
    let Some(step) = steps.get(index) else {
        return Ok(None);
    };
    let Some(text) = step.start_at.as_deref().filter(|t| !t.trim().is_empty()) else {
        return Ok(None);
    };
    if !step.execute {
        return Ok(None);
    }

    let now_utc = now.with_timezone(&Utc);
    let mut deadline = match StartAt::parse(text)? {
        StartAt::After(offset) => {
            anchor(steps, index, step.start_at_type, run_started).unwrap_or(now_utc) + offset
        }
        StartAt::At(time) => now
            .date_naive()
            .and_time(time)
            .and_local_timezone(now.timezone())
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| StartAtError(text.to_string()))?,
    };

    if deadline <= now_utc {
        if !step.wait_next_day {
            return Ok(None);
        }
        deadline += Duration::days(1);
    }
    Ok(Some(deadline))
}

fn anchor(
    steps: &[Step],
    index: usize,
    kind: StartAtType,
    run_started: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let previous = || steps[..index].iter().rev().find(|s| s.execute);

    match kind {
        StartAtType::EndStep => previous().and_then(|s| s.finished),
        StartAtType::StartStep => previous().and_then(|s| s.started),
        StartAtType::StartScheduler => Some(run_started),
        StartAtType::StartExecution => steps[..index]
            .iter()
            .filter(|s| s.execute)
            .find_map(|s| s.started)
            .or(Some(run_started)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepKind;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            StartAt::parse("09:30").unwrap(),
            StartAt::At(NaiveTime::from_hms_opt(9, 30, 0).unwrap())
        );
        assert_eq!(
            StartAt::parse("+00:01:30").unwrap(),
            StartAt::After(Duration::seconds(90))
        );
        assert!(StartAt::parse("25:00").is_err());
        assert!(StartAt::parse("soon").is_err());
        assert!(StartAt::parse("+1").is_err());
    }

    #[test]
    fn test_relative_from_previous_step_end() {
        let mut first = Step::new("First", StepKind::Default);
        first.started = Some(at(10, 0, 0));
        first.finished = Some(at(10, 0, 20));
        let steps = vec![
            first,
            Step::new("Second", StepKind::Default).with_start_at("+00:00:30", StartAtType::EndStep),
        ];

        let deadline = start_deadline(&steps, 1, at(9, 0, 0), at(10, 0, 25)).unwrap();
        assert_eq!(deadline, Some(at(10, 0, 50)));
    }

    #[test]
    fn test_relative_anchors() {
        let mut skipped = Step::new("Skipped", StepKind::Default).with_execute(false);
        skipped.started = Some(at(9, 0, 0));
        let mut first = Step::new("First", StepKind::Default);
        first.started = Some(at(10, 0, 0));
        first.finished = Some(at(10, 5, 0));
        let mut steps = vec![skipped, first, Step::new("Third", StepKind::Default)];
        let now = at(10, 5, 1);

        steps[2] = steps[2].clone().with_start_at("+00:10", StartAtType::StartStep);
        assert_eq!(
            start_deadline(&steps, 2, at(8, 0, 0), now).unwrap(),
            Some(at(10, 10, 0))
        );

        steps[2] = steps[2].clone().with_start_at("+02:10", StartAtType::StartScheduler);
        assert_eq!(
            start_deadline(&steps, 2, at(8, 0, 0), now).unwrap(),
            Some(at(10, 10, 0))
        );

        // Steps that do not execute are not an anchor
        steps[2] = steps[2].clone().with_start_at("+00:10", StartAtType::StartExecution);
        assert_eq!(
            start_deadline(&steps, 2, at(8, 0, 0), now).unwrap(),
            Some(at(10, 10, 0))
        );
    }

    #[test]
    fn test_past_time_of_day() {
        let step = Step::new("Open", StepKind::Default).with_start_at("08:00", StartAtType::EndStep);
        let now = at(9, 0, 0);

        assert_eq!(start_deadline(&[step.clone()], 0, now, now).unwrap(), None);

        let waiting = step.with_wait_next_day(true);
        assert_eq!(
            start_deadline(&[waiting], 0, now, now).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_future_time_of_day() {
        let step = Step::new("Close", StepKind::Default).with_start_at("17:45:10", StartAtType::EndStep);
        assert_eq!(
            start_deadline(&[step], 0, at(9, 0, 0), at(9, 0, 0)).unwrap(),
            Some(at(17, 45, 10))
        );
    }

    #[test]
    fn test_no_wait_without_setting_or_execution() {
        let plain = Step::new("Plain", StepKind::Default);
        assert_eq!(start_deadline(&[plain], 0, at(9, 0, 0), at(9, 0, 0)).unwrap(), None);

        let disabled = Step::new("Off", StepKind::Default)
            .with_start_at("+01:00", StartAtType::StartScheduler)
            .with_execute(false);
        assert_eq!(start_deadline(&[disabled], 0, at(9, 0, 0), at(9, 0, 0)).unwrap(), None);
    }

    #[test]
    fn test_malformed_setting_reported() {
        let step = Step::new("Bad", StepKind::Default).with_start_at("noon", StartAtType::EndStep);
        assert_eq!(
            start_deadline(&[step], 0, at(9, 0, 0), at(9, 0, 0)),
            Err(StartAtError("noon".to_string()))
        );
    }
}
