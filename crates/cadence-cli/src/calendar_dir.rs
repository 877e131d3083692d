//! A calendar stored as one `.ics` file per event in a directory, the layout
//! calendar apps and sync tools can watch.

use async_trait::async_trait;
use cadence_core::calendar::{CalendarClient, CalendarError, EventStart, RemoteEvent};
use chrono::Duration;
use icalendar::{Calendar, Component, EventLike};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const COMPLETED_PROPERTY: &str = "X-CADENCE-COMPLETED";

pub struct IcsDirCalendar {
    dir: PathBuf,
}

impl IcsDirCalendar {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remote ids are file stems; anything that could leave the directory is refused.
    fn path_for(&self, remote_id: &str) -> Result<PathBuf, CalendarError> {
        let valid = !remote_id.is_empty()
            && remote_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CalendarError::EventMissing(remote_id.to_string()));
        }
        Ok(self.dir.join(format!("{remote_id}.ics")))
    }

    async fn ensure_dir(&self) -> Result<(), CalendarError> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(CalendarError::CalendarGone),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(CalendarError::CalendarGone),
            Err(err) => Err(io_error(err)),
        }
    }

    async fn write(&self, path: &Path, event: &RemoteEvent) -> Result<(), CalendarError> {
        tokio::fs::write(path, render(event)).await.map_err(io_error)
    }
}

#[async_trait]
impl CalendarClient for IcsDirCalendar {
    async fn create_event(&self, event: &RemoteEvent) -> Result<String, CalendarError> {
        self.ensure_dir().await?;
        // The external id doubles as the file name, so a repeated create overwrites
        let remote_id = event.external_id.clone();
        let path = self.path_for(&remote_id)?;
        self.write(&path, event).await?;
        Ok(remote_id)
    }

    async fn update_event(&self, remote_id: &str, event: &RemoteEvent) -> Result<(), CalendarError> {
        self.ensure_dir().await?;
        let path = self.path_for(remote_id)?;
        if !tokio::fs::try_exists(&path).await.map_err(io_error)? {
            return Err(CalendarError::EventMissing(remote_id.to_string()));
        }
        self.write(&path, event).await
    }

    async fn delete_event(&self, remote_id: &str) -> Result<(), CalendarError> {
        self.ensure_dir().await?;
        let path = self.path_for(remote_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(CalendarError::EventMissing(remote_id.to_string()))
            }
            Err(err) => Err(io_error(err)),
        }
    }
}

fn io_error(err: std::io::Error) -> CalendarError {
    CalendarError::Transient(err.to_string())
}

/// Serialize one event as a VCALENDAR document.
pub fn render(event: &RemoteEvent) -> String {
    let mut cal = Calendar::new();

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.external_id);
    ics_event.summary(&event.title);

    match event.start {
        EventStart::AllDay(date) => {
            ics_event.all_day(date);
        }
        EventStart::At(at) => {
            ics_event.starts(at);
            ics_event.ends(at + Duration::minutes(event.duration_minutes));
        }
    }

    if event.completed {
        ics_event.add_property(COMPLETED_PROPERTY, "TRUE");
    }

    let ics_event = ics_event.done();
    cal.push(ics_event);
    cal.done().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rstest::rstest;

    fn event(external_id: &str) -> RemoteEvent {
        RemoteEvent {
            external_id: external_id.to_string(),
            title: "Water plants".to_string(),
            start: EventStart::At(Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap()),
            duration_minutes: 15,
            completed: false,
        }
    }

    #[test]
    fn test_render_timed_event() {
        let ics = render(&event("cadence-instance-abc"));
        assert!(ics.contains("UID:cadence-instance-abc"));
        assert!(ics.contains("SUMMARY:Water plants"));
        assert!(ics.contains("DTSTART:20260105T080000Z"));
        assert!(ics.contains("DTEND:20260105T081500Z"));
        assert!(!ics.contains(COMPLETED_PROPERTY));
    }

    #[test]
    fn test_render_all_day_completed_event() {
        let mut done = event("cadence-task-abc");
        done.start = EventStart::AllDay(NaiveDate::from_ymd_opt(2026, 4, 15).unwrap());
        done.completed = true;
        let ics = render(&done);
        assert!(ics.contains("20260415"));
        assert!(ics.contains("X-CADENCE-COMPLETED:TRUE"));
    }

    #[tokio::test]
    async fn test_create_update_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let calendar = IcsDirCalendar::new(dir.path());

        let remote_id = calendar.create_event(&event("cadence-instance-1")).await.unwrap();
        let path = dir.path().join(format!("{remote_id}.ics"));
        assert!(path.exists());

        // Creating the same external id again reuses the file
        let again = calendar.create_event(&event("cadence-instance-1")).await.unwrap();
        assert_eq!(again, remote_id);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let mut done = event("cadence-instance-1");
        done.completed = true;
        calendar.update_event(&remote_id, &done).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains(COMPLETED_PROPERTY));

        calendar.delete_event(&remote_id).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_event_missing() {
        let dir = tempfile::tempdir().unwrap();
        let calendar = IcsDirCalendar::new(dir.path());

        let update = calendar.update_event("cadence-instance-2", &event("cadence-instance-2")).await;
        assert_eq!(update, Err(CalendarError::EventMissing("cadence-instance-2".to_string())));
        let delete = calendar.delete_event("cadence-instance-2").await;
        assert!(matches!(delete, Err(CalendarError::EventMissing(_))));
    }

    #[rstest]
    #[case("../escape")]
    #[case("a/b")]
    #[case("")]
    #[tokio::test]
    async fn test_unsafe_remote_ids_are_refused(#[case] remote_id: &str) {
        let dir = tempfile::tempdir().unwrap();
        let calendar = IcsDirCalendar::new(dir.path());
        let result = calendar.delete_event(remote_id).await;
        assert!(matches!(result, Err(CalendarError::EventMissing(_))));
    }

    #[tokio::test]
    async fn test_missing_directory_is_calendar_gone() {
        let dir = tempfile::tempdir().unwrap();
        let calendar = IcsDirCalendar::new(dir.path().join("nope"));

        let result = calendar.create_event(&event("cadence-instance-3")).await;
        assert_eq!(result, Err(CalendarError::CalendarGone));
        assert!(CalendarError::CalendarGone.is_fatal());
    }
}
