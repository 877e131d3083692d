use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// Runs the `cadence` binary against a throwaway database and calendar directory
pub struct CliTestHarness {
    temp_dir: TempDir,
    db_path: PathBuf,
    calendar_dir: PathBuf,
}

impl CliTestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let calendar_dir = temp_dir.path().join("calendar");

        Self {
            temp_dir,
            db_path,
            calendar_dir,
        }
    }

    /// A command isolated from any cadence.toml or CADENCE_* settings of the host
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("cadence").expect("Failed to find cadence binary");
        cmd.current_dir(self.temp_dir.path());
        cmd.env("CADENCE_DATABASE_PATH", &self.db_path);
        cmd.env("CADENCE_CALENDAR_DIR", &self.calendar_dir);
        cmd.env("CADENCE_TIMEZONE", "UTC");
        cmd.env("CADENCE_SYNC__GRACE_PERIOD_MS", "0");
        cmd.env_remove("CADENCE_OWNER_ID");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn calendar_dir(&self) -> &Path {
        &self.calendar_dir
    }

    /// Path of the .ics file an entity is mirrored to
    pub fn event_path(&self, kind: &str, id: Uuid) -> PathBuf {
        self.calendar_dir.join(format!("cadence-{}-{}.ics", kind, id.simple()))
    }

    pub fn event_count(&self) -> usize {
        std::fs::read_dir(&self.calendar_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub fn run_success(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.command().args(args).assert().success()
    }

    pub fn run_failure(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.command().args(args).assert().failure()
    }

    /// Run successfully and return stdout
    pub fn stdout(&self, args: &[&str]) -> String {
        let output = self.run_success(args).get_output().stdout.clone();
        String::from_utf8(output).expect("stdout is not UTF-8")
    }
}

/// Every UUID printed in `text`, in order of appearance. Tolerates ANSI styling around them.
pub fn uuids_in(text: &str) -> Vec<Uuid> {
    let mut found = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 36 <= bytes.len() {
        if text.is_char_boundary(i) && text.is_char_boundary(i + 36) {
            if let Ok(id) = Uuid::parse_str(&text[i..i + 36]) {
                found.push(id);
                i += 36;
                continue;
            }
        }
        i += 1;
    }
    found
}

pub fn first_uuid(text: &str) -> Uuid {
    uuids_in(text)
        .into_iter()
        .next()
        .unwrap_or_else(|| panic!("no id in output:\n{text}"))
}

pub mod assertions {
    use predicates::prelude::*;

    pub fn has_error() -> impl Predicate<str> {
        predicate::str::contains("Error").or(predicate::str::contains("error"))
    }

    pub fn task_created_successfully() -> impl Predicate<str> {
        predicate::str::contains("✓").and(
            predicate::str::contains("Created task").or(predicate::str::contains("Created recurring task")),
        )
    }
}
