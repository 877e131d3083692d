use cadence_core::recurrence::{DateWindow, RecurrenceRule, RecurrenceRuleInput, RuleEvaluator};
use chrono::{NaiveDate, Weekday};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
}

fn bench_rule_validation(c: &mut Criterion) {
    let input = RecurrenceRuleInput {
        frequency: "weekly".to_string(),
        interval: 2,
        days_of_week: vec!["mon".to_string(), "wed".to_string(), "fri".to_string()],
        ..Default::default()
    };

    c.bench_function("rule_validation", |b| {
        b.iter(|| RecurrenceRule::try_from(black_box(input.clone())).unwrap())
    });
}

fn bench_occurrence_generation(c: &mut Criterion) {
    let rules = [
        ("daily", RecurrenceRule::daily(1).unwrap()),
        (
            "weekly_mwf",
            RecurrenceRule::weekly(1, &[Weekday::Mon, Weekday::Wed, Weekday::Fri]).unwrap(),
        ),
        ("monthly_31", RecurrenceRule::monthly(1, Some(31)).unwrap()),
    ];

    let mut group = c.benchmark_group("occurrence_generation");
    for (name, rule) in &rules {
        for days in [14u32, 90, 366] {
            let window = DateWindow::days(start(), days);
            group.bench_with_input(BenchmarkId::new(*name, days), &window, |b, window| {
                let evaluator = RuleEvaluator::new(rule, start());
                b.iter(|| evaluator.occurrences(black_box(*window)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_far_past_anchor(c: &mut Criterion) {
    // Start years before the window, so the anchor has to be moved forward
    let rule = RecurrenceRule::weekly(3, &[Weekday::Tue]).unwrap();
    let evaluator = RuleEvaluator::new(&rule, NaiveDate::from_ymd_opt(2001, 1, 2).unwrap());
    let window = DateWindow::days(start(), 14);

    c.bench_function("far_past_anchor", |b| {
        b.iter(|| evaluator.occurrences(black_box(window)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_rule_validation,
    bench_occurrence_generation,
    bench_far_past_anchor
);
criterion_main!(benches);
