/// Black-box tests for the cadence binary
///
/// Each test gets its own database and calendar directory; the grace period is
/// zero so every change is on disk by the time a command exits.
use predicates::prelude::*;

mod helpers;
use helpers::{assertions, first_uuid, uuids_in, CliTestHarness};

#[test]
fn test_cli_help_and_version() {
    let harness = CliTestHarness::new();

    harness
        .run_success(&["--help"])
        .stdout(predicate::str::contains("recurring-task"))
        .stdout(predicate::str::contains("resync"));

    harness
        .run_success(&["--version"])
        .stdout(predicate::str::contains("cadence"));

    harness
        .run_failure(&["invalid-command"])
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_add_one_off_task_writes_all_day_event() {
    let harness = CliTestHarness::new();

    let out = harness.stdout(&["add", "File taxes", "--due", "2031-04-15", "--priority", "high"]);
    assert!(out.contains("Created task"));
    assert!(out.contains("Due 2031-04-15"));

    let task_id = first_uuid(&out);
    let event = std::fs::read_to_string(harness.event_path("task", task_id)).unwrap();
    assert!(event.contains("SUMMARY:File taxes"));
    assert!(event.contains("20310415"));

    harness
        .run_success(&["tasks"])
        .stdout(predicate::str::contains("File taxes"))
        .stdout(predicate::str::contains("2031-04-15"));
}

#[test]
fn test_add_rejects_bad_input() {
    let harness = CliTestHarness::new();

    harness
        .run_failure(&["add", "Invalid Task", "--priority", "urgent"])
        .stderr(assertions::has_error());

    harness
        .run_failure(&["add", "Invalid Date Task", "--due", "next friday"])
        .stderr(assertions::has_error());

    harness
        .run_failure(&["add", "Bad zone", "--every", "daily", "--timezone", "Mars/Olympus"])
        .stderr(predicate::str::contains("Mars/Olympus"));

    harness
        .run_failure(&["add", "Bad day", "--every", "monthly", "--day", "32"])
        .stderr(predicate::str::contains("Invalid input"));

    harness
        .run_failure(&["add", "Unknown domain", "--domain", "nowhere"])
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_recurring_task_lists_and_syncs_instances() {
    let harness = CliTestHarness::new();

    harness
        .run_success(&["add", "Stretch", "--every", "daily", "--at", "07:30"])
        .stdout(assertions::task_created_successfully())
        .stdout(predicate::str::contains("every day at 07:30"));

    let listing = harness.stdout(&["list", "--days", "3"]);
    assert!(listing.contains("Stretch"));
    assert!(listing.contains("07:30"));
    assert_eq!(uuids_in(&listing).len(), 3);

    assert!(harness.event_count() >= 3);
}

#[test]
fn test_complete_and_skip_instances() {
    let harness = CliTestHarness::new();
    harness.run_success(&["add", "Water plants", "--every", "daily"]);

    let listing = harness.stdout(&["list", "--days", "2"]);
    let ids = uuids_in(&listing);
    assert_eq!(ids.len(), 2);
    let (first, second) = (ids[0].to_string(), ids[1].to_string());

    harness
        .run_success(&["do", &first])
        .stdout(predicate::str::contains("Completed instance"));
    let event = std::fs::read_to_string(harness.event_path("instance", ids[0])).unwrap();
    assert!(event.contains("X-CADENCE-COMPLETED:TRUE"));

    // A completed instance cannot be completed or skipped again
    harness
        .run_failure(&["do", &first])
        .stderr(predicate::str::contains("Cannot complete"));
    harness.run_failure(&["skip", &first]);

    harness
        .run_success(&["skip", &second])
        .stdout(predicate::str::contains("Skipped"));
    assert!(!harness.event_path("instance", ids[1]).exists());

    harness
        .run_success(&["unskip", &second])
        .stdout(predicate::str::contains("pending again"));
    assert!(harness.event_path("instance", ids[1]).exists());

    harness.run_success(&["reopen", &first]).stdout(predicate::str::contains("Reopened"));
    let event = std::fs::read_to_string(harness.event_path("instance", ids[0])).unwrap();
    assert!(!event.contains("X-CADENCE-COMPLETED"));
}

#[test]
fn test_batch_do_completes_every_instance() {
    let harness = CliTestHarness::new();
    harness.run_success(&["add", "Journal", "--every", "daily"]);

    let listing = harness.stdout(&["list", "--days", "3"]);
    let ids: Vec<String> = uuids_in(&listing).iter().map(|id| id.to_string()).collect();
    assert_eq!(ids.len(), 3);

    let mut args = vec!["do"];
    args.extend(ids.iter().map(String::as_str));
    harness
        .run_success(&args)
        .stdout(predicate::str::contains("Completed 3 instance(s)"));

    harness
        .run_success(&["list", "--days", "3"])
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("pending").not());
}

#[test]
fn test_one_off_task_complete_and_reopen() {
    let harness = CliTestHarness::new();
    let task_id = first_uuid(&harness.stdout(&["add", "Renew passport", "--due", "2031-06-01"]));
    let id = task_id.to_string();

    harness
        .run_success(&["do", &id])
        .stdout(predicate::str::contains("Completed task: 'Renew passport'"));
    let event = std::fs::read_to_string(harness.event_path("task", task_id)).unwrap();
    assert!(event.contains("X-CADENCE-COMPLETED:TRUE"));

    harness.run_success(&["tasks"]).stdout(predicate::str::contains("done"));

    harness
        .run_success(&["reopen", &id])
        .stdout(predicate::str::contains("Reopened task"));
}

#[test]
fn test_undo_after_sync_has_nothing_to_undo() {
    let harness = CliTestHarness::new();
    let task_id = first_uuid(&harness.stdout(&["add", "Call bank", "--due", "2031-02-02"]));
    let id = task_id.to_string();

    harness.run_success(&["do", &id]);
    harness
        .run_success(&["undo", &id])
        .stdout(predicate::str::contains("Nothing to undo"));
}

#[test]
fn test_edit_pause_and_resume_recurrence() {
    let harness = CliTestHarness::new();
    let task_id = first_uuid(&harness.stdout(&["add", "Run", "--every", "daily"]));
    let id = task_id.to_string();
    let before = harness.event_count();
    assert!(before > 0);

    harness
        .run_success(&["edit", &id, "--pause"])
        .stdout(predicate::str::contains("Recurrence paused"))
        .stdout(predicate::str::contains("Removed"));
    assert_eq!(harness.event_count(), 0);
    harness
        .run_success(&["list"])
        .stdout(predicate::str::contains("No instances"));

    harness
        .run_success(&["edit", &id, "--resume"])
        .stdout(predicate::str::contains("Recurrence resumed"));
    assert_eq!(harness.event_count(), before);

    harness
        .run_success(&["edit", &id, "--every", "weekly", "--on", "mon"])
        .stdout(predicate::str::contains("every week on Mon"));
}

#[test]
fn test_delete_removes_events() {
    let harness = CliTestHarness::new();
    let task_id = first_uuid(&harness.stdout(&["add", "Laundry", "--every", "daily"]));
    assert!(harness.event_count() > 0);

    harness
        .run_success(&["delete", &task_id.to_string()])
        .stdout(predicate::str::contains("Deleted task 'Laundry'"));
    assert_eq!(harness.event_count(), 0);

    harness
        .run_success(&["tasks"])
        .stdout(predicate::str::contains("No tasks found."));
}

#[test]
fn test_short_id_resolution() {
    let harness = CliTestHarness::new();
    let first = first_uuid(&harness.stdout(&["add", "Alpha", "--due", "2031-01-01"]));
    harness.run_success(&["add", "Beta", "--due", "2031-01-02"]);

    let prefix = &first.to_string()[..4];
    harness
        .run_failure(&["delete", prefix])
        .stderr(predicate::str::contains("Ambiguous ID"))
        .stderr(predicate::str::contains("Alpha"))
        .stderr(predicate::str::contains("Beta"));

    harness
        .run_failure(&["delete", "f"])
        .stderr(predicate::str::contains("at least 2 characters"));

    harness
        .run_failure(&["delete", "zz"])
        .stderr(predicate::str::contains("is not an ID"));

    harness
        .run_failure(&["delete", "ffff0000"])
        .stderr(predicate::str::contains("No task found"));
}

#[test]
fn test_domain_workflow() {
    let harness = CliTestHarness::new();

    harness
        .run_success(&["domain", "add", "health"])
        .stdout(predicate::str::contains("Domain 'health' created."));
    harness.run_failure(&["domain", "add", "health"]);

    harness.run_success(&["add", "Meditate", "--every", "daily", "--domain", "health"]);
    harness
        .run_success(&["tasks"])
        .stdout(predicate::str::contains("health"));

    harness
        .run_success(&["domain", "list"])
        .stdout(predicate::str::contains("health"));

    harness
        .run_success(&["domain", "delete", "health"])
        .stdout(predicate::str::contains("Domain 'health' deleted."));
    harness
        .run_success(&["domain", "list"])
        .stdout(predicate::str::contains("No domains found."));
}

#[test]
fn test_resync_rebuilds_calendar_directory() {
    let harness = CliTestHarness::new();
    harness.run_success(&["add", "Stretch", "--every", "daily"]);
    let expected = harness.event_count();
    assert!(expected > 0);

    for entry in std::fs::read_dir(harness.calendar_dir()).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }
    assert_eq!(harness.event_count(), 0);

    harness
        .run_success(&["resync"])
        .stdout(predicate::str::contains("Full resync scheduled."));
    assert_eq!(harness.event_count(), expected);

    harness
        .run_success(&["refresh"])
        .stdout(predicate::str::contains("0 new instance(s)"));
}
