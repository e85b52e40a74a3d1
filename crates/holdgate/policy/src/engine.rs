use std::collections::HashSet;

use holdgate_types::{DomainTag, ProhibitedCategory, ProposedIntent};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::catalog::{PolicyCatalog, RuleCondition};
use crate::error::PolicyError;

/// Outcome of policy screening.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyVerdict {
    Allow,
    AutoExpire(ExpiryReason),
}

impl PolicyVerdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyVerdict::Allow)
    }
}

/// Why an intent was auto-expired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryReason {
    /// The declared domain is not classifiable by this catalog.
    UnknownDomain(DomainTag),
    /// A prohibition rule matched.
    Prohibited {
        category: ProhibitedCategory,
        rule_id: String,
    },
}

impl ExpiryReason {
    pub fn category(&self) -> Option<ProhibitedCategory> {
        match self {
            ExpiryReason::UnknownDomain(_) => None,
            ExpiryReason::Prohibited { category, .. } => Some(*category),
        }
    }
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpiryReason::UnknownDomain(domain) => write!(f, "unknown domain {domain}"),
            ExpiryReason::Prohibited { category, rule_id } => {
                write!(f, "prohibited ({category}) by rule {rule_id}")
            }
        }
    }
}

/// Deterministic policy pre-filter.
///
/// Holds a compiled copy of one catalog version. Evaluation reads no external
/// state and has no side effects, so the same intent always gets the same
/// verdict from the same engine.
pub struct PolicyEngine {
    version: u32,
    known_domains: Vec<DomainTag>,
    rules: Vec<CompiledRule>,
}

struct CompiledRule {
    rule_id: String,
    category: ProhibitedCategory,
    condition: Compiled,
}

enum Compiled {
    DomainWithin(DomainTag),
    Operation(Regex),
    Resource(Regex),
    ParameterPresent(String),
    Parameter(String, Regex),
    AnyParameter(Regex),
    Rationale(Regex),
    AllOf(Vec<Compiled>),
    AnyOf(Vec<Compiled>),
    Not(Box<Compiled>),
}

impl PolicyEngine {
    /// Compile a catalog. Fails on invalid patterns, duplicate rule ids, or an
    /// empty domain list.
    pub fn new(catalog: PolicyCatalog) -> Result<Self, PolicyError> {
        if catalog.known_domains.is_empty() {
            return Err(PolicyError::NoKnownDomains);
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(catalog.rules.len());
        for rule in catalog.rules {
            if !seen.insert(rule.rule_id.clone()) {
                return Err(PolicyError::DuplicateRule(rule.rule_id));
            }
            let condition = compile(&rule.rule_id, &rule.condition)?;
            rules.push(CompiledRule {
                rule_id: rule.rule_id,
                category: rule.category,
                condition,
            });
        }

        Ok(Self {
            version: catalog.version,
            known_domains: catalog.known_domains,
            rules,
        })
    }

    /// Engine over the built-in catalog.
    pub fn with_builtin() -> Result<Self, PolicyError> {
        Self::new(PolicyCatalog::builtin())
    }

    pub fn catalog_version(&self) -> u32 {
        self.version
    }

    /// Screen an intent. Rules are checked in catalog order; the first match
    /// wins.
    pub fn evaluate(&self, intent: &ProposedIntent) -> PolicyVerdict {
        if !self
            .known_domains
            .iter()
            .any(|known| intent.domain().is_within(known))
        {
            return PolicyVerdict::AutoExpire(ExpiryReason::UnknownDomain(intent.domain().clone()));
        }

        for rule in &self.rules {
            if rule.condition.matches(intent) {
                return PolicyVerdict::AutoExpire(ExpiryReason::Prohibited {
                    category: rule.category,
                    rule_id: rule.rule_id.clone(),
                });
            }
        }

        PolicyVerdict::Allow
    }
}

fn compile(rule_id: &str, condition: &RuleCondition) -> Result<Compiled, PolicyError> {
    let regex = |pattern: &str| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| PolicyError::InvalidPattern {
                rule_id: rule_id.to_string(),
                source,
            })
    };

    Ok(match condition {
        RuleCondition::DomainWithin { domain } => Compiled::DomainWithin(domain.clone()),
        RuleCondition::OperationMatches { pattern } => Compiled::Operation(regex(pattern)?),
        RuleCondition::ResourceMatches { pattern } => Compiled::Resource(regex(pattern)?),
        RuleCondition::ParameterPresent { key } => Compiled::ParameterPresent(key.clone()),
        RuleCondition::ParameterMatches { key, pattern } => {
            Compiled::Parameter(key.clone(), regex(pattern)?)
        }
        RuleCondition::AnyParameterMatches { pattern } => Compiled::AnyParameter(regex(pattern)?),
        RuleCondition::RationaleMatches { pattern } => Compiled::Rationale(regex(pattern)?),
        RuleCondition::AllOf { conditions } => Compiled::AllOf(
            conditions
                .iter()
                .map(|c| compile(rule_id, c))
                .collect::<Result<_, _>>()?,
        ),
        RuleCondition::AnyOf { conditions } => Compiled::AnyOf(
            conditions
                .iter()
                .map(|c| compile(rule_id, c))
                .collect::<Result<_, _>>()?,
        ),
        RuleCondition::Not { condition } => Compiled::Not(Box::new(compile(rule_id, condition)?)),
    })
}

impl Compiled {
    fn matches(&self, intent: &ProposedIntent) -> bool {
        let target = intent.target();
        match self {
            Compiled::DomainWithin(domain) => intent.domain().is_within(domain),
            Compiled::Operation(re) => re.is_match(&target.operation),
            Compiled::Resource(re) => re.is_match(&target.resource),
            Compiled::ParameterPresent(key) => target.parameters.contains_key(key),
            Compiled::Parameter(key, re) => target
                .parameters
                .get(key)
                .is_some_and(|value| any_string_leaf(value, re)),
            Compiled::AnyParameter(re) => target
                .parameters
                .values()
                .any(|value| any_string_leaf(value, re)),
            Compiled::Rationale(re) => {
                let rationale = intent.rationale();
                re.is_match(&rationale.description)
                    || rationale
                        .evidence
                        .values()
                        .any(|value| any_string_leaf(value, re))
            }
            Compiled::AllOf(all) => all.iter().all(|c| c.matches(intent)),
            Compiled::AnyOf(any) => any.iter().any(|c| c.matches(intent)),
            Compiled::Not(inner) => !inner.matches(intent),
        }
    }
}

/// Scalars are matched by their display form; containers are searched
/// recursively.
fn any_string_leaf(value: &serde_json::Value, re: &Regex) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => re.is_match(s),
        serde_json::Value::Bool(b) => re.is_match(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => re.is_match(&n.to_string()),
        serde_json::Value::Array(items) => items.iter().any(|v| any_string_leaf(v, re)),
        serde_json::Value::Object(map) => map.values().any(|v| any_string_leaf(v, re)),
    }
}
