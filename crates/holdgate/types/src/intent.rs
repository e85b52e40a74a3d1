//! The unit of work entering the authorization pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::IntentError;
use crate::ids::ActionId;

/// Risk classification declared by the perception collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskClass {
    Low,
    High,
}

impl RiskClass {
    /// HIGH-risk actions need a co-signature quorum before dispatch.
    pub fn requires_quorum(&self) -> bool {
        matches!(self, RiskClass::High)
    }
}

/// Dotted domain tag, e.g. `audio.mix` or `document.edit`.
///
/// Tags are compared case-insensitively; they are normalized to lowercase on
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainTag(String);

impl DomainTag {
    pub fn new(tag: impl AsRef<str>) -> Result<Self, IntentError> {
        let normalized = tag.as_ref().trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(IntentError::EmptyDomain);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this tag equals `scope` or is a dotted child of it.
    ///
    /// `audio.mix` is within `audio`; `audiobook` is not.
    pub fn is_within(&self, scope: &DomainTag) -> bool {
        self.0 == scope.0
            || (self.0.len() > scope.0.len()
                && self.0.starts_with(&scope.0)
                && self.0.as_bytes()[scope.0.len()] == b'.')
    }
}

impl TryFrom<String> for DomainTag {
    type Error = IntentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DomainTag> for String {
    fn from(tag: DomainTag) -> Self {
        tag.0
    }
}

impl std::fmt::Display for DomainTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why the perception layer proposes the action.
///
/// Carried through the pipeline unmodified and recorded in the ledger as
/// opaque telemetry. No authorization decision reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rationale {
    pub source: String,
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: BTreeMap<String, serde_json::Value>,
}

impl Rationale {
    pub fn new(
        source: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
    ) -> Result<Self, IntentError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(IntentError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            source: source.into(),
            description: description.into(),
            confidence,
            evidence: BTreeMap::new(),
        })
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }
}

/// Descriptor of the side effect the executor would carry out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetAction {
    pub operation: String,
    pub resource: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl TargetAction {
    pub fn new(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            resource: resource.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// A proposed action awaiting authorization.
///
/// Immutable once built: fields are private and only readable through
/// accessors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedIntent {
    id: ActionId,
    risk: RiskClass,
    domain: DomainTag,
    rationale: Rationale,
    target: TargetAction,
}

impl ProposedIntent {
    pub fn builder(domain: DomainTag, target: TargetAction) -> ProposedIntentBuilder {
        ProposedIntentBuilder {
            id: None,
            risk: RiskClass::Low,
            domain,
            rationale: None,
            target,
        }
    }

    pub fn id(&self) -> &ActionId {
        &self.id
    }

    pub fn risk(&self) -> RiskClass {
        self.risk
    }

    pub fn domain(&self) -> &DomainTag {
        &self.domain
    }

    pub fn rationale(&self) -> &Rationale {
        &self.rationale
    }

    pub fn target(&self) -> &TargetAction {
        &self.target
    }
}

/// Builder for `ProposedIntent`.
pub struct ProposedIntentBuilder {
    id: Option<ActionId>,
    risk: RiskClass,
    domain: DomainTag,
    rationale: Option<Rationale>,
    target: TargetAction,
}

impl ProposedIntentBuilder {
    pub fn id(mut self, id: ActionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn risk(mut self, risk: RiskClass) -> Self {
        self.risk = risk;
        self
    }

    pub fn rationale(mut self, rationale: Rationale) -> Self {
        self.rationale = Some(rationale);
        self
    }

    pub fn build(self) -> Result<ProposedIntent, IntentError> {
        let rationale = self.rationale.ok_or(IntentError::MissingField("rationale"))?;
        if !(0.0..=1.0).contains(&rationale.confidence) {
            return Err(IntentError::ConfidenceOutOfRange(rationale.confidence));
        }
        Ok(ProposedIntent {
            id: self.id.unwrap_or_default(),
            risk: self.risk,
            domain: self.domain,
            rationale,
            target: self.target,
        })
    }
}
