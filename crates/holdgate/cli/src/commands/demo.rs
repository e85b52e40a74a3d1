//! Scripted walk through the pipeline on a simulated clock.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use colored::*;
use holdgate_service::{
    Admission, AuthorizationService, HoldgateConfig, ScriptedExecutor, SignalOutcome,
};
use holdgate_types::{
    ActionId, Clock, DomainTag, HumanSignal, ManualClock, ProposedIntent, Rationale,
    ReentryKind, RiskClass, SessionId, SurfaceId, TargetAction, TelemetrySink, TracingSink,
};

#[derive(Args)]
pub struct DemoArgs {
    /// Write the resulting ledger as JSON lines
    #[arg(long)]
    pub export: Option<PathBuf>,
}

struct Demo {
    service: AuthorizationService,
    clock: Arc<ManualClock>,
}

pub async fn execute(config: HoldgateConfig, args: DemoArgs) -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::new());
    let service = AuthorizationService::builder(config)
        .clock(clock.clone() as Arc<dyn Clock>)
        .sink(Arc::new(TracingSink) as Arc<dyn TelemetrySink>)
        .executor(Arc::new(ScriptedExecutor::new()))
        .build()?;
    let demo = Demo { service, clock };

    let desk = SurfaceId::new("desk");
    let tablet = SurfaceId::new("tablet");
    demo.service.register_surface(desk.clone());
    demo.service.register_surface(tablet.clone());
    demo.service.bind(&desk, SessionId::new("desk-1"), None)?;
    demo.service.bind(&tablet, SessionId::new("tablet-1"), None)?;

    section("Policy gate");
    let leak = intent("document", "export", "contacts/all", RiskClass::Low)?;
    match demo.service.propose(leak, &desk, None).await? {
        Admission::Expired(reason) => report("auto-expired before display", &reason.to_string()),
        other => report("unexpected admission", &format!("{other:?}")),
    }

    section("Short hold");
    let action = demo.offer(intent("audio", "normalize", "take-3", RiskClass::Low)?, &desk).await?;
    let outcome = demo.hold(&action, &desk, 250).await?;
    report("release after 250ms", &describe(&outcome));

    section("Full hold, LOW risk");
    let action = demo.offer(intent("audio", "normalize", "take-3", RiskClass::Low)?, &desk).await?;
    demo.hold(&action, &desk, 450).await?;
    demo.service.signal(&action, &desk, HumanSignal::Confirm).await?;
    let outcome = demo.service.signal(&action, &desk, HumanSignal::Confirm).await?;
    report("second confirm", &describe(&outcome));

    section("HIGH risk quorum");
    let action = demo
        .offer(intent("document", "delete", "drafts/old-mix-notes", RiskClass::High)?, &desk)
        .await?;
    demo.hold(&action, &desk, 500).await?;
    demo.service.signal(&action, &desk, HumanSignal::Confirm).await?;
    let outcome = demo.service.signal(&action, &desk, HumanSignal::Confirm).await?;
    report("desk confirm alone", &describe(&outcome));
    demo.service.attach_cosigner(&action, &tablet)?;
    demo.hold(&action, &tablet, 480).await?;
    demo.service.signal(&action, &tablet, HumanSignal::Confirm).await?;
    let outcome = demo.service.signal(&action, &desk, HumanSignal::Confirm).await?;
    report("desk confirm after tablet co-signed", &describe(&outcome));

    section("Lease and dead-man switch");
    let lease = demo
        .service
        .issue_lease(&desk, DomainTag::new("audio")?, 60_000)?;
    demo.clock.advance(40);
    demo.service.heartbeat(&lease);
    demo.clock.advance(45);
    let admission = demo
        .service
        .propose(intent("audio", "gain", "bus-2", RiskClass::Low)?, &desk, Some(&lease))
        .await?;
    report("heartbeat 45ms ago", admission_label(&admission));
    demo.clock.advance(60);
    let admission = demo
        .service
        .propose(intent("audio", "gain", "bus-3", RiskClass::Low)?, &desk, Some(&lease))
        .await?;
    report("heartbeat 60ms ago", admission_label(&admission));

    section("Kill and deep link");
    let cascade = demo.service.on_kill(&desk)?;
    demo.service.on_reentry(&desk, ReentryKind::DeepLink)?;
    let lifecycle = demo.service.surfaces().get(&desk)?;
    report(
        "after kill + deep link",
        &format!(
            "foreground={} authority={} rejected={} leases revoked={}",
            lifecycle.foreground(),
            lifecycle.has_authority(),
            cascade.rejected_actions.len(),
            cascade.revoked_leases.len()
        ),
    );

    section("Ledger");
    let status = demo.service.verify_ledger()?;
    report("verify", &format!("{status:?}"));
    if let Some(path) = args.export {
        let file = File::create(&path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        let written = demo.service.ledger().export_jsonl(BufWriter::new(file))?;
        report("exported", &format!("{written} entries to {}", path.display()));
    }
    Ok(())
}

impl Demo {
    async fn offer(&self, intent: ProposedIntent, surface: &SurfaceId) -> anyhow::Result<ActionId> {
        let action = intent.id().clone();
        self.service.propose(intent, surface, None).await?;
        Ok(action)
    }

    async fn hold(
        &self,
        action: &ActionId,
        surface: &SurfaceId,
        hold_ms: u64,
    ) -> anyhow::Result<SignalOutcome> {
        self.service.signal(action, surface, HumanSignal::Press).await?;
        self.clock.advance(hold_ms);
        Ok(self
            .service
            .signal(action, surface, HumanSignal::Release)
            .await?)
    }
}

fn intent(
    domain: &str,
    operation: &str,
    resource: &str,
    risk: RiskClass,
) -> anyhow::Result<ProposedIntent> {
    Ok(ProposedIntent::builder(DomainTag::new(domain)?, TargetAction::new(operation, resource))
        .risk(risk)
        .rationale(Rationale::new("demo-agent", format!("{operation} {resource}"), 0.8)?)
        .build()?)
}

fn describe(outcome: &SignalOutcome) -> String {
    match outcome {
        SignalOutcome::Moved { from, to } => format!("{from} -> {to}"),
        SignalOutcome::Ignored { state } => format!("ignored in {state}"),
        SignalOutcome::AwaitingQuorum { have, need } => format!("awaiting quorum ({have}/{need})"),
        SignalOutcome::Rejected(reason) => format!("rejected: {reason}"),
        SignalOutcome::Executed(entry) => format!("executed, sealed at index {}", entry.index()),
    }
}

fn admission_label(admission: &Admission) -> &'static str {
    match admission {
        Admission::Expired(_) => "expired by policy",
        Admission::LeaseExecuted(_) => "executed under lease",
        Admission::Offered { .. } => "lease denied, offered for a hold",
    }
}

fn section(title: &str) {
    println!("\n{}", title.bold());
}

fn report(label: &str, detail: &str) {
    println!("  {} {}", format!("{label}:").cyan(), detail);
}
