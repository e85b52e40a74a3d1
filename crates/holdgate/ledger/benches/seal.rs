//! Seal and verify throughput.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use holdgate_ledger::{
    verify_chain, AuthorityProof, ExecutionResult, ForensicLedger, UnsignedSealer,
};
use holdgate_types::{
    Clock, DomainTag, IntentState, ManualClock, NullSink, ProposedIntent, Rationale, SessionId,
    TargetAction,
};

fn intent(n: usize) -> ProposedIntent {
    ProposedIntent::builder(
        DomainTag::new("document.edit").unwrap(),
        TargetAction::new("insert_text", format!("doc://bench/{n}")),
    )
    .rationale(Rationale::new("bench", "synthetic", 0.5).unwrap())
    .build()
    .unwrap()
}

fn populated(clock: &Arc<ManualClock>, n: usize) -> ForensicLedger {
    let ledger = ForensicLedger::new(
        Arc::new(UnsignedSealer::default()),
        clock.clone(),
        Arc::new(NullSink),
    );
    for i in 0..n {
        let intent = intent(i);
        ledger
            .seal(
                &intent,
                AuthorityProof::hold(
                    SessionId::new("bench"),
                    400,
                    vec![IntentState::Executed],
                    clock.stamp(),
                ),
                ExecutionResult::success(intent.domain().clone(), 1, b"ok"),
            )
            .unwrap();
    }
    ledger
}

fn bench_seal(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new());
    let ledger = populated(&clock, 0);
    let mut n = 0usize;
    c.bench_function("ledger_seal", |b| {
        b.iter(|| {
            n += 1;
            let intent = intent(n);
            ledger
                .seal(
                    black_box(&intent),
                    AuthorityProof::hold(
                        SessionId::new("bench"),
                        400,
                        vec![IntentState::Executed],
                        clock.stamp(),
                    ),
                    ExecutionResult::success(intent.domain().clone(), 1, b"ok"),
                )
                .unwrap()
        })
    });
}

fn bench_verify_1k(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new());
    let entries = populated(&clock, 1_000).entries().unwrap();
    c.bench_function("ledger_verify_1k", |b| {
        b.iter(|| verify_chain(black_box(&entries)))
    });
}

criterion_group!(benches, bench_seal, bench_verify_1k);
criterion_main!(benches);
