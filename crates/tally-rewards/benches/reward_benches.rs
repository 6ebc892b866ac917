//! Criterion benchmarks for tally-rewards hot paths.
//!
//! Covers: debt changes against a populated ledger, historical ratio lookups,
//! and penalty tier lookups.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tally_core::constants::{PRECISE_UNIT, UNIT};
use tally_core::types::ParticipantId;
use tally_rewards::debt_ledger::DebtLedger;
use tally_rewards::penalty::PenaltySchedule;

fn populated_ledger(participants: u32, changes_each: u32) -> (DebtLedger, Vec<ParticipantId>) {
    let ids: Vec<ParticipantId> = (0..participants)
        .map(|i| ParticipantId::from_label(&format!("holder-{i}")))
        .collect();
    let mut ledger = DebtLedger::new();
    for round in 1..=changes_each {
        for (i, id) in ids.iter().enumerate() {
            let value = (round as u64 * 100 + i as u64 % 7) * UNIT;
            ledger
                .record_debt_change(*id, value)
                .expect("debt change");
        }
    }
    (ledger, ids)
}

fn bench_record_debt_change(c: &mut Criterion) {
    let (mut ledger, ids) = populated_ledger(1_000, 4);
    let mut value = 50 * UNIT;

    c.bench_function("record_debt_change_1k_holders", |b| {
        b.iter(|| {
            value += 1;
            ledger.record_debt_change(black_box(ids[17]), black_box(value))
        })
    });
}

fn bench_ownership_ratio(c: &mut Criterion) {
    let (ledger, ids) = populated_ledger(1_000, 4);
    // Roughly midway through the log.
    let index = ledger.len() / 2;

    c.bench_function("historical_ownership_ratio", |b| {
        b.iter(|| ledger.ownership_ratio(black_box(&ids[400]), black_box(index)))
    });
}

fn bench_penalty_lookup(c: &mut Criterion) {
    let schedule = PenaltySchedule::default();
    let ratio = PRECISE_UNIT * 35 / 100;

    c.bench_function("penalty_for", |b| {
        b.iter(|| schedule.penalty_for(black_box(ratio)))
    });
}

criterion_group!(
    benches,
    bench_record_debt_change,
    bench_ownership_ratio,
    bench_penalty_lookup,
);
criterion_main!(benches);
