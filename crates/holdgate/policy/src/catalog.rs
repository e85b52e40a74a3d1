//! Versioned catalog of prohibited intent categories.

use std::path::Path;

use holdgate_types::{DomainTag, ProhibitedCategory};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// A versioned, enumerated set of prohibitions plus the domains the engine
/// knows how to classify.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyCatalog {
    pub version: u32,
    pub known_domains: Vec<DomainTag>,
    pub rules: Vec<ProhibitionRule>,
}

/// One prohibition: when `condition` holds, the intent auto-expires.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProhibitionRule {
    pub rule_id: String,
    pub category: ProhibitedCategory,
    #[serde(default)]
    pub description: String,
    pub condition: RuleCondition,
}

/// Declarative match over an intent. Patterns are case-insensitive regexes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    DomainWithin { domain: DomainTag },
    OperationMatches { pattern: String },
    ResourceMatches { pattern: String },
    ParameterPresent { key: String },
    ParameterMatches { key: String, pattern: String },
    /// Any string leaf of any parameter value.
    AnyParameterMatches { pattern: String },
    /// Rationale description or any string leaf of its evidence.
    RationaleMatches { pattern: String },
    AllOf { conditions: Vec<RuleCondition> },
    AnyOf { conditions: Vec<RuleCondition> },
    Not { condition: Box<RuleCondition> },
}

impl PolicyCatalog {
    pub fn from_yaml_str(source: &str) -> Result<Self, PolicyError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&source)
    }

    /// Built-in catalog, version 1.
    pub fn builtin() -> Self {
        let domain = |tag: &str| DomainTag::new(tag).expect("static domain tags are non-empty");
        Self {
            version: 1,
            known_domains: vec![
                domain("audio"),
                domain("video"),
                domain("document"),
                domain("filesystem"),
                domain("network"),
            ],
            rules: vec![
                ProhibitionRule {
                    rule_id: "pii-export".into(),
                    category: ProhibitedCategory::PersonalDataExposure,
                    description: "sharing identity records outside the device".into(),
                    condition: RuleCondition::AllOf {
                        conditions: vec![
                            RuleCondition::OperationMatches {
                                pattern: r"^(share|export|upload|publish|send)".into(),
                            },
                            RuleCondition::ResourceMatches {
                                pattern: r"(^|/)(contacts|identity|passport|medical|pii)(/|$)"
                                    .into(),
                            },
                        ],
                    },
                },
                ProhibitionRule {
                    rule_id: "pii-literal".into(),
                    category: ProhibitedCategory::PersonalDataExposure,
                    description: "parameters carry a national id or card number".into(),
                    condition: RuleCondition::AnyParameterMatches {
                        pattern: r"\b\d{3}-\d{2}-\d{4}\b|\b(?:\d[ -]?){15,16}\b".into(),
                    },
                },
                ProhibitionRule {
                    rule_id: "net-unscoped".into(),
                    category: ProhibitedCategory::UnscopedNetworkCall,
                    description: "outbound call without an allowed host".into(),
                    condition: RuleCondition::AllOf {
                        conditions: vec![
                            RuleCondition::OperationMatches {
                                pattern: r"^(http|fetch|post|upload|connect|request)".into(),
                            },
                            RuleCondition::Not {
                                condition: Box::new(RuleCondition::ParameterPresent {
                                    key: "allowed_host".into(),
                                }),
                            },
                        ],
                    },
                },
                ProhibitionRule {
                    rule_id: "root-config".into(),
                    category: ProhibitedCategory::RootConfigMutation,
                    description: "writes under root-level system configuration".into(),
                    condition: RuleCondition::AllOf {
                        conditions: vec![
                            RuleCondition::OperationMatches {
                                pattern: r"^(write|delete|set|modify|chmod|chown|move|rename)"
                                    .into(),
                            },
                            RuleCondition::ResourceMatches {
                                pattern: r"^(/(etc|boot|sys|proc)(/|$)|system://config)".into(),
                            },
                        ],
                    },
                },
            ],
        }
    }
}

impl Default for PolicyCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
