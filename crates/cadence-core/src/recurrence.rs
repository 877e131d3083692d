use crate::error::CoreError;
use crate::models::{MaterializationConfig, Task};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

/// Hard ceiling on the span of a single evaluation.
pub const MAX_WINDOW_DAYS: i64 = 366;

/// Default cap on dates a single evaluation returns.
pub const DEFAULT_MAX_OCCURRENCES: u16 = 366;

pub const MAX_INTERVAL: u32 = 999;

/// The repeating unit of a rule together with its day filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Daily,
    /// Days are sorted Monday-first and deduplicated. Empty means
    /// "the weekday of the start date".
    Weekly { days_of_week: Vec<Weekday> },
    /// None means "the day of month of the start date".
    Monthly { day_of_month: Option<u8> },
}

impl Pattern {
    fn frequency(&self) -> &'static str {
        match self {
            Pattern::Daily => "daily",
            Pattern::Weekly { .. } => "weekly",
            Pattern::Monthly { .. } => "monthly",
        }
    }
}

/// A validated recurrence rule.
///
/// Construct one through [`RecurrenceRuleInput`]; every way into this type
/// (including deserializing a stored rule) goes through the same validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RecurrenceRuleInput", into = "RecurrenceRuleInput")]
pub struct RecurrenceRule {
    pub pattern: Pattern,
    pub interval: u32,
    /// Local time of day in the task's timezone
    pub anchor_time: Option<NaiveTime>,
    /// Rolling materialization horizon; falls back to the configured default
    pub horizon_days: Option<u32>,
}

impl RecurrenceRule {
    pub fn daily(interval: u32) -> Result<Self, CoreError> {
        RecurrenceRuleInput {
            frequency: "daily".to_string(),
            interval: interval as i64,
            ..Default::default()
        }
        .try_into()
    }

    pub fn weekly(interval: u32, days_of_week: &[Weekday]) -> Result<Self, CoreError> {
        RecurrenceRuleInput {
            frequency: "weekly".to_string(),
            interval: interval as i64,
            days_of_week: days_of_week.iter().map(|day| day.to_string()).collect(),
            ..Default::default()
        }
        .try_into()
    }

    pub fn monthly(interval: u32, day_of_month: Option<u8>) -> Result<Self, CoreError> {
        RecurrenceRuleInput {
            frequency: "monthly".to_string(),
            interval: interval as i64,
            day_of_month: day_of_month.map(i64::from),
            ..Default::default()
        }
        .try_into()
    }

    pub fn with_anchor_time(mut self, anchor_time: NaiveTime) -> Self {
        self.anchor_time = Some(anchor_time);
        self
    }

    /// Short human description, e.g. "every 2 weeks on Mon, Thu".
    pub fn describe(&self) -> String {
        let unit = match &self.pattern {
            Pattern::Daily => "day",
            Pattern::Weekly { .. } => "week",
            Pattern::Monthly { .. } => "month",
        };
        let mut text = if self.interval == 1 {
            format!("every {unit}")
        } else {
            format!("every {} {unit}s", self.interval)
        };
        match &self.pattern {
            Pattern::Weekly { days_of_week } if !days_of_week.is_empty() => {
                let days: Vec<String> = days_of_week.iter().map(|d| d.to_string()).collect();
                text.push_str(&format!(" on {}", days.join(", ")));
            }
            Pattern::Monthly { day_of_month: Some(day) } => {
                text.push_str(&format!(" on day {day}"));
            }
            _ => {}
        }
        if let Some(time) = self.anchor_time {
            text.push_str(&format!(" at {}", time.format("%H:%M")));
        }
        text
    }
}

/// Boundary shape of a rule, as submitted by callers and stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurrenceRuleInput {
    pub frequency: String,
    pub interval: i64,
    pub days_of_week: Vec<String>,
    pub day_of_month: Option<i64>,
    pub anchor_time: Option<NaiveTime>,
    pub horizon_days: Option<i64>,
}

impl Default for RecurrenceRuleInput {
    fn default() -> Self {
        Self {
            frequency: String::new(),
            interval: 1,
            days_of_week: Vec::new(),
            day_of_month: None,
            anchor_time: None,
            horizon_days: None,
        }
    }
}

impl TryFrom<RecurrenceRuleInput> for RecurrenceRule {
    type Error = CoreError;

    fn try_from(input: RecurrenceRuleInput) -> Result<Self, Self::Error> {
        if input.interval < 1 || input.interval > MAX_INTERVAL as i64 {
            return Err(CoreError::Validation(format!(
                "interval must be between 1 and {MAX_INTERVAL}, got {}",
                input.interval
            )));
        }

        let horizon_days = match input.horizon_days {
            Some(days) if !(1..=MAX_WINDOW_DAYS).contains(&days) => {
                return Err(CoreError::Validation(format!(
                    "horizon_days must be between 1 and {MAX_WINDOW_DAYS}, got {days}"
                )));
            }
            Some(days) => Some(days as u32),
            None => None,
        };

        let frequency = input.frequency.trim().to_lowercase();
        let pattern = match frequency.as_str() {
            "daily" => Pattern::Daily,
            "weekly" => Pattern::Weekly {
                days_of_week: parse_weekdays(&input.days_of_week)?,
            },
            "monthly" => Pattern::Monthly {
                day_of_month: input.day_of_month.map(parse_day_of_month).transpose()?,
            },
            "" => return Err(CoreError::Validation("frequency is required".to_string())),
            other => {
                return Err(CoreError::Validation(format!(
                    "unknown frequency '{other}' (expected daily, weekly or monthly)"
                )));
            }
        };

        if !input.days_of_week.is_empty() && !matches!(pattern, Pattern::Weekly { .. }) {
            return Err(CoreError::Validation(format!(
                "days_of_week only applies to weekly rules, not {}",
                pattern.frequency()
            )));
        }
        if input.day_of_month.is_some() && !matches!(pattern, Pattern::Monthly { .. }) {
            return Err(CoreError::Validation(format!(
                "day_of_month only applies to monthly rules, not {}",
                pattern.frequency()
            )));
        }

        Ok(RecurrenceRule {
            pattern,
            interval: input.interval as u32,
            anchor_time: input.anchor_time,
            horizon_days,
        })
    }
}

impl From<RecurrenceRule> for RecurrenceRuleInput {
    fn from(rule: RecurrenceRule) -> Self {
        let frequency = rule.pattern.frequency().to_string();
        let (days_of_week, day_of_month) = match rule.pattern {
            Pattern::Daily => (Vec::new(), None),
            Pattern::Weekly { days_of_week } => {
                (days_of_week.iter().map(|d| d.to_string()).collect(), None)
            }
            Pattern::Monthly { day_of_month } => (Vec::new(), day_of_month.map(i64::from)),
        };
        RecurrenceRuleInput {
            frequency,
            interval: rule.interval as i64,
            days_of_week,
            day_of_month,
            anchor_time: rule.anchor_time,
            horizon_days: rule.horizon_days.map(i64::from),
        }
    }
}

fn parse_weekdays(names: &[String]) -> Result<Vec<Weekday>, CoreError> {
    let mut days = names
        .iter()
        .map(|name| {
            name.trim()
                .parse::<Weekday>()
                .map_err(|_| CoreError::Validation(format!("unknown weekday '{name}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    days.sort_by_key(|day| day.num_days_from_monday());
    days.dedup();
    Ok(days)
}

fn parse_day_of_month(day: i64) -> Result<u8, CoreError> {
    if (1..=31).contains(&day) {
        Ok(day as u8)
    } else {
        Err(CoreError::Validation(format!(
            "day_of_month must be between 1 and 31, got {day}"
        )))
    }
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::Validation(format!(
                "window start {start} is after its end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// `days` consecutive dates beginning at `start`. Zero is treated as one.
    pub fn days(start: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start,
            end: start + Duration::days(span),
        }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Expands a rule anchored at a start date into concrete occurrence dates.
#[derive(Debug, Clone)]
pub struct RuleEvaluator<'a> {
    rule: &'a RecurrenceRule,
    starts_on: NaiveDate,
    max_occurrences: u16,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(rule: &'a RecurrenceRule, starts_on: NaiveDate) -> Self {
        Self {
            rule,
            starts_on,
            max_occurrences: DEFAULT_MAX_OCCURRENCES,
        }
    }

    pub fn with_max_occurrences(mut self, max_occurrences: u16) -> Self {
        self.max_occurrences = max_occurrences.max(1);
        self
    }

    pub fn starts_on(&self) -> NaiveDate {
        self.starts_on
    }

    /// Occurrence dates inside `window`, ascending.
    ///
    /// The window is clipped to the start date and to [`MAX_WINDOW_DAYS`];
    /// dates that do not exist in a month (the 31st of April) are skipped.
    pub fn occurrences(&self, window: DateWindow) -> Result<Vec<NaiveDate>, CoreError> {
        let from = window.start.max(self.starts_on);
        let to = window.end.min(from + Duration::days(MAX_WINDOW_DAYS - 1));
        if from > to {
            return Ok(Vec::new());
        }

        let anchor = self.anchor_for(from);
        let rrule_set: RRuleSet = self.rrule_string(anchor).parse().map_err(|e| {
            CoreError::Validation(format!("cannot expand rule '{}': {e}", self.rule.describe()))
        })?;

        // after/before are exclusive
        let tz: rrule::Tz = Utc.into();
        let after = (midnight_utc(from) - Duration::seconds(1)).with_timezone(&tz);
        let before = (midnight_utc(to) + Duration::seconds(1)).with_timezone(&tz);
        let result = rrule_set.after(after).before(before).all(self.max_occurrences);

        let mut dates: Vec<NaiveDate> = result
            .dates
            .iter()
            .map(|dt| dt.date_naive())
            .filter(|date| from <= *date && *date <= to && self.matches_filter(*date))
            .collect();
        dates.dedup();
        Ok(dates)
    }

    pub fn is_occurrence(&self, date: NaiveDate) -> Result<bool, CoreError> {
        Ok(!self.occurrences(DateWindow::single(date))?.is_empty())
    }

    /// First date of the period containing `from`, aligned to the rule's
    /// interval counted from the start date's period.
    fn anchor_for(&self, from: NaiveDate) -> NaiveDate {
        let interval = i64::from(self.rule.interval);
        match &self.rule.pattern {
            Pattern::Daily => {
                let elapsed = (from - self.starts_on).num_days().max(0);
                self.starts_on + Duration::days(elapsed / interval * interval)
            }
            Pattern::Weekly { .. } => {
                let base = week_start(self.starts_on);
                let weeks = ((week_start(from) - base).num_days() / 7).max(0);
                base + Duration::weeks(weeks / interval * interval)
            }
            Pattern::Monthly { .. } => {
                let base = month_start(self.starts_on);
                let months = (i64::from(from.year()) - i64::from(base.year())) * 12
                    + i64::from(from.month0())
                    - i64::from(base.month0());
                let aligned = (months.max(0) / interval * interval) as u32;
                base.checked_add_months(Months::new(aligned)).unwrap_or(base)
            }
        }
    }

    fn rrule_string(&self, anchor: NaiveDate) -> String {
        let mut rule = format!(
            "FREQ={};INTERVAL={}",
            self.rule.pattern.frequency().to_uppercase(),
            self.rule.interval
        );
        match &self.rule.pattern {
            Pattern::Daily => {}
            Pattern::Weekly { .. } => {
                let days: Vec<&str> = self.weekdays().into_iter().map(weekday_code).collect();
                rule.push_str(&format!(";BYDAY={}", days.join(",")));
            }
            Pattern::Monthly { .. } => {
                rule.push_str(&format!(";BYMONTHDAY={}", self.day_of_month()));
            }
        }
        format!("DTSTART:{}T000000Z\nRRULE:{}", anchor.format("%Y%m%d"), rule)
    }

    fn matches_filter(&self, date: NaiveDate) -> bool {
        match &self.rule.pattern {
            Pattern::Daily => true,
            Pattern::Weekly { .. } => self.weekdays().contains(&date.weekday()),
            Pattern::Monthly { .. } => date.day() == u32::from(self.day_of_month()),
        }
    }

    fn weekdays(&self) -> Vec<Weekday> {
        match &self.rule.pattern {
            Pattern::Weekly { days_of_week } if !days_of_week.is_empty() => days_of_week.clone(),
            _ => vec![self.starts_on.weekday()],
        }
    }

    fn day_of_month(&self) -> u8 {
        match &self.rule.pattern {
            Pattern::Monthly { day_of_month: Some(day) } => *day,
            _ => self.starts_on.day() as u8,
        }
    }
}

fn midnight_utc(date: NaiveDate) -> chrono::DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

/// Decides which dates should be materialized for a task right now.
#[derive(Debug, Clone, Default)]
pub struct MaterializationManager {
    config: MaterializationConfig,
}

impl MaterializationManager {
    pub fn new(config: MaterializationConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(MaterializationConfig::default())
    }

    pub fn config(&self) -> &MaterializationConfig {
        &self.config
    }

    pub fn horizon_days(&self, rule: &RecurrenceRule) -> u32 {
        rule.horizon_days.unwrap_or(self.config.default_horizon_days)
    }

    /// The rolling window `[today, today + horizon)` for a task.
    pub fn window_for(&self, task: &Task, today: NaiveDate) -> Option<DateWindow> {
        let rule = task.recurrence_rule.as_ref().filter(|_| task.is_recurring)?;
        Some(DateWindow::days(today, self.horizon_days(rule)))
    }

    /// Dates a recurring task should have instances for inside `window`.
    /// Non-recurring tasks produce nothing.
    pub fn occurrences(&self, task: &Task, window: DateWindow) -> Result<Vec<NaiveDate>, CoreError> {
        match task.evaluator() {
            Some(evaluator) => evaluator
                .with_max_occurrences(self.config.max_occurrences)
                .occurrences(window),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input(frequency: &str) -> RecurrenceRuleInput {
        RecurrenceRuleInput {
            frequency: frequency.to_string(),
            ..Default::default()
        }
    }

    mod validation_tests {
        use super::*;

        #[test]
        fn test_unknown_frequency_is_rejected() {
            let result = RecurrenceRule::try_from(input("fortnightly"));
            assert!(matches!(result, Err(CoreError::Validation(msg)) if msg.contains("fortnightly")));
        }

        #[test]
        fn test_missing_frequency_is_rejected() {
            assert!(matches!(
                RecurrenceRule::try_from(input("")),
                Err(CoreError::Validation(_))
            ));
        }

        #[rstest]
        #[case(0)]
        #[case(-3)]
        #[case(1000)]
        fn test_interval_out_of_range(#[case] interval: i64) {
            let result = RecurrenceRule::try_from(RecurrenceRuleInput {
                interval,
                ..input("daily")
            });
            assert!(matches!(result, Err(CoreError::Validation(_))));
        }

        #[test]
        fn test_misplaced_filters_are_rejected() {
            let daily_with_days = RecurrenceRuleInput {
                days_of_week: vec!["mon".to_string()],
                ..input("daily")
            };
            assert!(RecurrenceRule::try_from(daily_with_days).is_err());

            let weekly_with_day = RecurrenceRuleInput {
                day_of_month: Some(3),
                ..input("weekly")
            };
            assert!(RecurrenceRule::try_from(weekly_with_day).is_err());
        }

        #[rstest]
        #[case(0)]
        #[case(32)]
        fn test_day_of_month_out_of_range(#[case] day: i64) {
            let result = RecurrenceRule::try_from(RecurrenceRuleInput {
                day_of_month: Some(day),
                ..input("monthly")
            });
            assert!(matches!(result, Err(CoreError::Validation(_))));
        }

        #[test]
        fn test_weekdays_are_normalized() {
            let rule = RecurrenceRule::try_from(RecurrenceRuleInput {
                days_of_week: vec!["Fri".into(), "monday".into(), "WED".into(), "fri".into()],
                ..input("Weekly")
            })
            .unwrap();
            assert_eq!(
                rule.pattern,
                Pattern::Weekly {
                    days_of_week: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]
                }
            );
        }

        #[test]
        fn test_unknown_weekday_is_rejected() {
            let result = RecurrenceRule::try_from(RecurrenceRuleInput {
                days_of_week: vec!["someday".into()],
                ..input("weekly")
            });
            assert!(matches!(result, Err(CoreError::Validation(msg)) if msg.contains("someday")));
        }

        #[test]
        fn test_horizon_bounds() {
            let too_long = RecurrenceRuleInput {
                horizon_days: Some(400),
                ..input("daily")
            };
            assert!(RecurrenceRule::try_from(too_long).is_err());

            let ok = RecurrenceRuleInput {
                horizon_days: Some(30),
                ..input("daily")
            };
            assert_eq!(RecurrenceRule::try_from(ok).unwrap().horizon_days, Some(30));
        }

        #[test]
        fn test_stored_json_is_revalidated() {
            let rule = RecurrenceRule::weekly(2, &[Weekday::Tue])
                .unwrap()
                .with_anchor_time(NaiveTime::from_hms_opt(7, 30, 0).unwrap());
            let json = serde_json::to_string(&rule).unwrap();
            let back: RecurrenceRule = serde_json::from_str(&json).unwrap();
            assert_eq!(back, rule);

            let tampered = json.replace("\"interval\":2", "\"interval\":0");
            assert!(serde_json::from_str::<RecurrenceRule>(&tampered).is_err());
        }
    }

    mod evaluator_tests {
        use super::*;

        #[test]
        fn test_weekly_mon_wed_fri_two_weeks() {
            let rule = RecurrenceRule::weekly(1, &[Weekday::Mon, Weekday::Wed, Weekday::Fri]).unwrap();
            let start = date(2026, 1, 5);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::days(start, 14))
                .unwrap();
            assert_eq!(
                dates,
                vec![
                    date(2026, 1, 5),
                    date(2026, 1, 7),
                    date(2026, 1, 9),
                    date(2026, 1, 12),
                    date(2026, 1, 14),
                    date(2026, 1, 16),
                ]
            );
        }

        #[test]
        fn test_daily_interval() {
            let rule = RecurrenceRule::daily(3).unwrap();
            let start = date(2026, 3, 1);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::new(date(2026, 3, 2), date(2026, 3, 12)).unwrap())
                .unwrap();
            assert_eq!(dates, vec![date(2026, 3, 4), date(2026, 3, 7), date(2026, 3, 10)]);
        }

        #[test]
        fn test_biweekly_counts_from_start_week() {
            let rule = RecurrenceRule::weekly(2, &[Weekday::Tue]).unwrap();
            // Thursday; first eligible Tuesday is two weeks on
            let start = date(2026, 1, 8);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::days(start, 35))
                .unwrap();
            assert_eq!(dates, vec![date(2026, 1, 20), date(2026, 2, 3)]);
        }

        #[test]
        fn test_weekly_defaults_to_start_weekday() {
            let rule = RecurrenceRule::weekly(1, &[]).unwrap();
            let start = date(2026, 1, 7);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::days(start, 15))
                .unwrap();
            assert_eq!(dates, vec![date(2026, 1, 7), date(2026, 1, 14), date(2026, 1, 21)]);
        }

        #[test]
        fn test_monthly_day_31_skips_short_months() {
            let rule = RecurrenceRule::monthly(1, Some(31)).unwrap();
            let start = date(2026, 1, 1);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::new(start, date(2026, 6, 30)).unwrap())
                .unwrap();
            assert_eq!(dates, vec![date(2026, 1, 31), date(2026, 3, 31), date(2026, 5, 31)]);
        }

        #[test]
        fn test_monthly_defaults_to_start_day() {
            let rule = RecurrenceRule::monthly(2, None).unwrap();
            let start = date(2026, 1, 15);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::new(start, date(2026, 7, 1)).unwrap())
                .unwrap();
            assert_eq!(dates, vec![date(2026, 1, 15), date(2026, 3, 15), date(2026, 5, 15)]);
        }

        #[test]
        fn test_nothing_before_start() {
            let rule = RecurrenceRule::daily(1).unwrap();
            let start = date(2026, 2, 10);
            let dates = RuleEvaluator::new(&rule, start)
                .occurrences(DateWindow::new(date(2026, 2, 1), date(2026, 2, 9)).unwrap())
                .unwrap();
            assert!(dates.is_empty());
        }

        #[test]
        fn test_far_past_start_keeps_interval_phase() {
            let rule = RecurrenceRule::daily(7).unwrap();
            let start = date(1990, 1, 1);
            let window = DateWindow::days(date(2026, 1, 1), 21);
            let dates = RuleEvaluator::new(&rule, start).occurrences(window).unwrap();
            assert_eq!(dates.len(), 3);
            for d in dates {
                assert_eq!((d - start).num_days() % 7, 0);
            }
        }

        #[test]
        fn test_window_is_clamped() {
            let rule = RecurrenceRule::daily(1).unwrap();
            let start = date(2026, 1, 1);
            let window = DateWindow::new(start, date(2030, 1, 1)).unwrap();
            let dates = RuleEvaluator::new(&rule, start).occurrences(window).unwrap();
            assert_eq!(dates.len() as i64, MAX_WINDOW_DAYS);
        }

        #[test]
        fn test_max_occurrences_caps_output() {
            let rule = RecurrenceRule::daily(1).unwrap();
            let start = date(2026, 1, 1);
            let dates = RuleEvaluator::new(&rule, start)
                .with_max_occurrences(5)
                .occurrences(DateWindow::days(start, 30))
                .unwrap();
            assert_eq!(dates.len(), 5);
        }

        #[test]
        fn test_is_occurrence() {
            let rule = RecurrenceRule::weekly(1, &[Weekday::Mon]).unwrap();
            let evaluator = RuleEvaluator::new(&rule, date(2026, 1, 5));
            assert!(evaluator.is_occurrence(date(2026, 1, 12)).unwrap());
            assert!(!evaluator.is_occurrence(date(2026, 1, 13)).unwrap());
        }
    }

    #[test]
    fn test_describe() {
        let rule = RecurrenceRule::weekly(2, &[Weekday::Mon, Weekday::Thu])
            .unwrap()
            .with_anchor_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(rule.describe(), "every 2 weeks on Mon, Thu at 09:00");
        assert_eq!(RecurrenceRule::daily(1).unwrap().describe(), "every day");
    }

    #[test]
    fn test_date_window() {
        let window = DateWindow::days(date(2026, 1, 5), 14);
        assert_eq!(window.end(), date(2026, 1, 18));
        assert_eq!(window.len_days(), 14);
        assert!(window.contains(date(2026, 1, 18)));
        assert!(!window.contains(date(2026, 1, 19)));
        assert!(DateWindow::new(date(2026, 1, 2), date(2026, 1, 1)).is_err());
    }

    proptest! {
        #[test]
        fn prop_weekly_occurrences_are_ordered_and_filtered(
            offset in 0i64..3000,
            interval in 1u32..5,
            mask in 1u8..128,
            span in 1u32..120,
        ) {
            let days: Vec<Weekday> = (0..7)
                .filter(|bit| mask & (1 << bit) != 0)
                .filter_map(|bit| Weekday::try_from(bit as u8).ok())
                .collect();
            let rule = RecurrenceRule::weekly(interval, &days).unwrap();
            let start = date(2020, 1, 1) + Duration::days(offset);
            let window = DateWindow::days(date(2024, 6, 1), span);
            let dates = RuleEvaluator::new(&rule, start).occurrences(window).unwrap();

            prop_assert!(dates.windows(2).all(|pair| pair[0] < pair[1]));
            for d in &dates {
                prop_assert!(window.contains(*d));
                prop_assert!(*d >= start);
                prop_assert!(days.contains(&d.weekday()));
                let weeks = (week_start(*d) - week_start(start)).num_days() / 7;
                prop_assert_eq!(weeks % i64::from(interval), 0);
            }
        }

        #[test]
        fn prop_daily_matches_arithmetic(offset in 0i64..5000, interval in 1u32..30, span in 1u32..200) {
            let rule = RecurrenceRule::daily(interval).unwrap();
            let start = date(2015, 1, 1) + Duration::days(offset);
            let window = DateWindow::days(date(2026, 1, 1), span);
            let dates = RuleEvaluator::new(&rule, start).occurrences(window).unwrap();

            let expected: Vec<NaiveDate> = (0..span as i64)
                .map(|i| window.start() + Duration::days(i))
                .filter(|d| *d >= start && (*d - start).num_days() % i64::from(interval) == 0)
                .collect();
            prop_assert_eq!(dates, expected);
        }
    }
}
