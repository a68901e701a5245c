// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Revocation requirements and the strategy matrix derived from them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Revocation checking demanded for one chain role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevocationMethod {
    Crl,
    Ocsp,
    Either,
    Both,
    Other,
}

impl RevocationMethod {
    pub const ALL: [RevocationMethod; 5] = [
        RevocationMethod::Crl,
        RevocationMethod::Ocsp,
        RevocationMethod::Either,
        RevocationMethod::Both,
        RevocationMethod::Other,
    ];
}

impl std::str::FromStr for RevocationMethod {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crl" | "crl-check" => Ok(RevocationMethod::Crl),
            "ocsp" | "ocsp-check" => Ok(RevocationMethod::Ocsp),
            "either" | "either-check" => Ok(RevocationMethod::Either),
            "both" | "both-check" => Ok(RevocationMethod::Both),
            "other" | "no-check" => Ok(RevocationMethod::Other),
            _ => Err(ConfigurationError::UnrecognizedMethod(s.to_string())),
        }
    }
}

/// Per-role revocation requirement of a signature policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevocationRequirement {
    pub ca: RevocationMethod,
    pub end_entity: RevocationMethod,
}

impl RevocationRequirement {
    pub const fn new(ca: RevocationMethod, end_entity: RevocationMethod) -> Self {
        Self { ca, end_entity }
    }
}

impl Default for RevocationRequirement {
    fn default() -> Self {
        Self::new(RevocationMethod::Either, RevocationMethod::Either)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown certification path validation method for {role}")]
    UnknownValidationMethod { role: ChainRole },
    #[error("unrecognized revocation method: {0}")]
    UnrecognizedMethod(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainRole {
    EndEntity,
    Ca,
}

impl std::fmt::Display for ChainRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainRole::EndEntity => f.write_str("end-entity certificate"),
            ChainRole::Ca => f.write_str("CA certificates"),
        }
    }
}

/// Concrete check executed for one role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckMethod {
    Crl,
    Ocsp,
    Both,
}

impl CheckMethod {
    pub const ALL: [CheckMethod; 3] = [CheckMethod::Crl, CheckMethod::Ocsp, CheckMethod::Both];

    pub fn uses_crl(self) -> bool {
        matches!(self, CheckMethod::Crl | CheckMethod::Both)
    }

    pub fn uses_ocsp(self) -> bool {
        matches!(self, CheckMethod::Ocsp | CheckMethod::Both)
    }
}

/// One of the nine end-entity × CA check combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Strategy {
    pub end_entity: CheckMethod,
    pub ca: CheckMethod,
}

impl Strategy {
    pub const ALL: [Strategy; 9] = {
        use CheckMethod::*;
        [
            Strategy::new(Crl, Crl),
            Strategy::new(Crl, Ocsp),
            Strategy::new(Crl, Both),
            Strategy::new(Ocsp, Crl),
            Strategy::new(Ocsp, Ocsp),
            Strategy::new(Ocsp, Both),
            Strategy::new(Both, Crl),
            Strategy::new(Both, Ocsp),
            Strategy::new(Both, Both),
        ]
    };

    pub const fn new(end_entity: CheckMethod, ca: CheckMethod) -> Self {
        Self { end_entity, ca }
    }

    pub fn for_role(&self, role: ChainRole) -> CheckMethod {
        match role {
            ChainRole::EndEntity => self.end_entity,
            ChainRole::Ca => self.ca,
        }
    }

    /// End entity and CAs are checked differently.
    pub fn is_mixed(&self) -> bool {
        self.end_entity != self.ca
    }

    pub fn requires_crl(&self) -> bool {
        self.end_entity.uses_crl() || self.ca.uses_crl()
    }

    pub fn requires_ocsp(&self) -> bool {
        self.end_entity.uses_ocsp() || self.ca.uses_ocsp()
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "end-entity={:?}, ca={:?}", self.end_entity, self.ca)
    }
}

fn resolve_role(
    method: RevocationMethod,
    role: ChainRole,
) -> Result<CheckMethod, ConfigurationError> {
    match method {
        RevocationMethod::Crl | RevocationMethod::Either => Ok(CheckMethod::Crl),
        RevocationMethod::Ocsp => Ok(CheckMethod::Ocsp),
        RevocationMethod::Both => Ok(CheckMethod::Both),
        RevocationMethod::Other => Err(ConfigurationError::UnknownValidationMethod { role }),
    }
}

/// Map a policy requirement to a strategy. `Either` prefers CRLs; `Other` is refused.
pub fn resolve(requirement: &RevocationRequirement) -> Result<Strategy, ConfigurationError> {
    let end_entity = resolve_role(requirement.end_entity, ChainRole::EndEntity)?;
    let ca = resolve_role(requirement.ca, ChainRole::Ca)?;
    Ok(Strategy::new(end_entity, ca))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_resolve_matrix_is_total() {
        let mut strategies = BTreeSet::new();
        let mut errors = 0;
        for ca in RevocationMethod::ALL {
            for end_entity in RevocationMethod::ALL {
                match resolve(&RevocationRequirement::new(ca, end_entity)) {
                    Ok(strategy) => {
                        assert_ne!(ca, RevocationMethod::Other);
                        assert_ne!(end_entity, RevocationMethod::Other);
                        strategies.insert(strategy);
                    }
                    Err(ConfigurationError::UnknownValidationMethod { .. }) => {
                        assert!(
                            ca == RevocationMethod::Other || end_entity == RevocationMethod::Other
                        );
                        errors += 1;
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }
        assert_eq!(errors, 9);
        assert_eq!(strategies.len(), 9);
        assert_eq!(strategies, Strategy::ALL.into_iter().collect());
    }

    #[test]
    fn test_either_prefers_crl() {
        let strategy = resolve(&RevocationRequirement::default()).unwrap();
        assert_eq!(strategy, Strategy::new(CheckMethod::Crl, CheckMethod::Crl));
        assert!(!strategy.is_mixed());

        let strategy = resolve(&RevocationRequirement::new(
            RevocationMethod::Ocsp,
            RevocationMethod::Either,
        ))
        .unwrap();
        assert_eq!(strategy, Strategy::new(CheckMethod::Crl, CheckMethod::Ocsp));
        assert!(strategy.is_mixed());
        assert!(strategy.requires_crl() && strategy.requires_ocsp());
    }

    #[test]
    fn test_other_names_the_role() {
        let err = resolve(&RevocationRequirement::new(
            RevocationMethod::Crl,
            RevocationMethod::Other,
        ))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnknownValidationMethod {
                role: ChainRole::EndEntity
            }
        );
    }

    #[test]
    fn test_parse_method_names() {
        assert_eq!("either".parse::<RevocationMethod>(), Ok(RevocationMethod::Either));
        assert_eq!("OCSP".parse::<RevocationMethod>(), Ok(RevocationMethod::Ocsp));
        assert!("sometimes".parse::<RevocationMethod>().is_err());
        let req: RevocationRequirement =
            serde_json::from_str(r#"{"ca":"both","end_entity":"crl"}"#).unwrap();
        assert_eq!(req.ca, RevocationMethod::Both);
    }
}
