use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::service::TaskService;
use cadence_core::timezone::{parse_timezone, today_in};
use chrono::{Days, NaiveDate};

use crate::cli::ListCommand;
use crate::config::Config;
use crate::views::table::display_instances;

pub async fn list_instances(service: &TaskService, config: &Config, command: ListCommand) -> Result<()> {
    let tz = match &command.timezone {
        Some(name) => parse_timezone(name)?,
        None => config.tz()?,
    };
    let (from, to) = range(&command, today_in(&tz))?;

    // Roll horizons forward so the listing reflects today
    service.refresh(config.owner_id).await?;

    let instances = service.list_instances(config.owner_id, from, to, tz).await?;
    display_instances(&instances, &tz);
    Ok(())
}

fn range(command: &ListCommand, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let from = command.from.unwrap_or(today);
    let to = match command.to {
        Some(to) => to,
        None => {
            let span = command.days.max(1) - 1;
            from.checked_add_days(Days::new(span.into()))
                .ok_or_else(|| anyhow!(CoreError::Validation("date range is out of bounds".to_string())))?
        }
    };
    if to < from {
        return Err(anyhow!(CoreError::Validation(format!(
            "--to ({to}) is before --from ({from})"
        ))));
    }
    Ok((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(from: Option<NaiveDate>, to: Option<NaiveDate>, days: u32) -> ListCommand {
        ListCommand { from, to, days, timezone: None }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_default_range_is_a_week_from_today() {
        let (from, to) = range(&command(None, None, 7), date("2026-01-05")).unwrap();
        assert_eq!(from, date("2026-01-05"));
        assert_eq!(to, date("2026-01-11"));
    }

    #[test]
    fn test_zero_days_still_shows_one_day() {
        let (from, to) = range(&command(Some(date("2026-03-01")), None, 0), date("2026-01-05")).unwrap();
        assert_eq!(from, to);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let result = range(&command(Some(date("2026-03-02")), Some(date("2026-03-01")), 7), date("2026-01-05"));
        assert!(result.is_err());
    }
}
