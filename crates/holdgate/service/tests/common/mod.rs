#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use holdgate_ledger::{Digest, LedgerError, SealSigner, UnsignedSealer};
use holdgate_service::{
    AuthorizationService, HoldgateConfig, ScriptedExecutor, ServiceResult, SignalOutcome,
};
use holdgate_types::{
    ActionId, Clock, DomainTag, HumanSignal, ManualClock, ProposedIntent, Rationale,
    RecordingSink, RiskClass, SessionId, SurfaceId, TargetAction, TelemetrySink,
};

pub struct Harness {
    pub service: Arc<AuthorizationService>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub executor: Arc<ScriptedExecutor>,
}

pub fn harness() -> Harness {
    harness_with(HoldgateConfig::default(), ScriptedExecutor::new())
}

pub fn harness_with(config: HoldgateConfig, executor: ScriptedExecutor) -> Harness {
    let sealer = Arc::new(UnsignedSealer::new(config.ledger.sealing_authority.clone()));
    harness_sealed_by(config, executor, sealer)
}

pub fn harness_sealed_by(
    config: HoldgateConfig,
    executor: ScriptedExecutor,
    sealer: Arc<dyn SealSigner>,
) -> Harness {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(RecordingSink::new());
    let executor = Arc::new(executor);
    let service = AuthorizationService::builder(config)
        .clock(clock.clone() as Arc<dyn Clock>)
        .sink(sink.clone() as Arc<dyn TelemetrySink>)
        .executor(executor.clone())
        .sealer(sealer)
        .build()
        .unwrap();
    Harness {
        service: Arc::new(service),
        clock,
        sink,
        executor,
    }
}

/// Signs nothing and refuses while `offline` is set.
#[derive(Default)]
pub struct SwitchableSealer {
    pub offline: AtomicBool,
}

impl SwitchableSealer {
    pub fn offline() -> Self {
        Self {
            offline: AtomicBool::new(true),
        }
    }

    pub fn bring_online(&self) {
        self.offline.store(false, Ordering::SeqCst);
    }
}

impl SealSigner for SwitchableSealer {
    fn authority(&self) -> &str {
        "holdgate"
    }

    fn sign(&self, _entry_hash: &Digest) -> Result<Option<Vec<u8>>, LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Signing {
                authority: "holdgate".into(),
                reason: "sealing key offline".into(),
            });
        }
        Ok(None)
    }
}

pub fn surface(name: &str) -> SurfaceId {
    SurfaceId::new(name)
}

pub fn session(id: &str) -> SessionId {
    SessionId::new(id)
}

pub fn intent(domain: &str, operation: &str, resource: &str, risk: RiskClass) -> ProposedIntent {
    ProposedIntent::builder(
        DomainTag::new(domain).unwrap(),
        TargetAction::new(operation, resource),
    )
    .risk(risk)
    .rationale(Rationale::new("perception", "suggested by the mixer agent", 0.9).unwrap())
    .build()
    .unwrap()
}

pub fn low_risk_edit() -> ProposedIntent {
    intent("audio", "normalize", "track-1", RiskClass::Low)
}

pub fn high_risk_edit() -> ProposedIntent {
    intent("document", "delete", "drafts/release-notes", RiskClass::High)
}

impl Harness {
    /// Register `surface` and bind `session` on it.
    pub fn bound_surface(&self, name: &str, session_id: &str) -> SurfaceId {
        let surface = surface(name);
        self.service.register_surface(surface.clone());
        self.service
            .bind(&surface, session(session_id), None)
            .unwrap();
        surface
    }

    pub async fn send(
        &self,
        action_id: &ActionId,
        surface: &SurfaceId,
        signal: HumanSignal,
    ) -> ServiceResult<SignalOutcome> {
        self.service.signal(action_id, surface, signal).await
    }

    /// Press, hold for `hold_ms`, release.
    pub async fn hold(&self, action_id: &ActionId, surface: &SurfaceId, hold_ms: u64) -> SignalOutcome {
        self.send(action_id, surface, HumanSignal::Press).await.unwrap();
        self.clock.advance(hold_ms);
        self.send(action_id, surface, HumanSignal::Release).await.unwrap()
    }

    /// Full hold plus the first confirm, leaving the instance at `CONFIRM_READY`.
    pub async fn arm(&self, action_id: &ActionId, surface: &SurfaceId) -> SignalOutcome {
        self.hold(action_id, surface, 450).await;
        self.send(action_id, surface, HumanSignal::Confirm).await.unwrap()
    }
}
