// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Chain validation against a revocation requirement.
//!
//! Every (subject, issuer) pair of a [`CertPath`] is checked leaf-first: signature, then
//! validity window, then revocation. The final pair uses a configured trust anchor as the
//! issuer. When the end entity and the CAs use different revocation methods, the end entity
//! is checked first and the CA portion is rebuilt with the CA method checking every
//! certificate it places on the path.

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    builder::{CertPath, ChainBuilder, PathError},
    cert::{Certificate, SignatureError},
    crl::Crl,
    evidence::RevocationEvidenceIndex,
    pool::{AiaFetcher, CertificatePool},
    requirement::{self, ChainRole, ConfigurationError, RevocationRequirement, Strategy},
    revocation::{MethodChecker, RevocationCheck, RevocationFailure},
    trust::TrustAnchorStore,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("signature does not verify under the issuer key")]
    SignatureMismatch,
    #[error("unsupported signature algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("issuer name does not match the next certificate's subject")]
    NameChaining,
    #[error("no trust anchor for issuer {issuer}")]
    NoTrustAnchor { issuer: String },
    #[error("certificate revoked at {0}")]
    Revoked(OffsetDateTime),
    #[error("invalid CRL: {0}")]
    InvalidCrl(SignatureError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("{0}")]
    Unspecified(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid {
        reason: InvalidReason,
        cert_with_error: Option<Certificate>,
        crl_with_error: Option<Crl>,
    },
    RevocationStatusUndetermined {
        cert_with_error: Certificate,
        crl_with_error: Option<Crl>,
        detail: String,
    },
    CrlMissing {
        cert_with_error: Certificate,
        detail: String,
    },
    Expired {
        cert_with_error: Certificate,
    },
    NotYetValid {
        cert_with_error: Certificate,
    },
}

/// Machine-readable form of a [`ValidationOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_with_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crl_with_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Valid,
    Invalid,
    RevocationStatusUndetermined,
    CrlMissing,
    Expired,
    NotYetValid,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            ValidationOutcome::Valid => OutcomeStatus::Valid,
            ValidationOutcome::Invalid { .. } => OutcomeStatus::Invalid,
            ValidationOutcome::RevocationStatusUndetermined { .. } => {
                OutcomeStatus::RevocationStatusUndetermined
            }
            ValidationOutcome::CrlMissing { .. } => OutcomeStatus::CrlMissing,
            ValidationOutcome::Expired { .. } => OutcomeStatus::Expired,
            ValidationOutcome::NotYetValid { .. } => OutcomeStatus::NotYetValid,
        }
    }

    pub fn cert_with_error(&self) -> Option<&Certificate> {
        match self {
            ValidationOutcome::Valid => None,
            ValidationOutcome::Invalid {
                cert_with_error, ..
            } => cert_with_error.as_ref(),
            ValidationOutcome::RevocationStatusUndetermined {
                cert_with_error, ..
            }
            | ValidationOutcome::CrlMissing {
                cert_with_error, ..
            }
            | ValidationOutcome::Expired { cert_with_error }
            | ValidationOutcome::NotYetValid { cert_with_error } => Some(cert_with_error),
        }
    }

    pub fn crl_with_error(&self) -> Option<&Crl> {
        match self {
            ValidationOutcome::Invalid { crl_with_error, .. }
            | ValidationOutcome::RevocationStatusUndetermined { crl_with_error, .. } => {
                crl_with_error.as_ref()
            }
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            ValidationOutcome::Valid => None,
            ValidationOutcome::Invalid { reason, .. } => Some(reason.to_string()),
            ValidationOutcome::RevocationStatusUndetermined { detail, .. }
            | ValidationOutcome::CrlMissing { detail, .. } => Some(detail.clone()),
            ValidationOutcome::Expired { cert_with_error } => Some(format!(
                "certificate expired at {}",
                cert_with_error.not_after()
            )),
            ValidationOutcome::NotYetValid { cert_with_error } => Some(format!(
                "certificate not valid before {}",
                cert_with_error.not_before()
            )),
        }
    }

    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            status: self.status(),
            detail: self.detail(),
            cert_with_error: self.cert_with_error().map(|c| c.subject_name().to_string()),
            crl_with_error: self.crl_with_error().map(|c| c.issuer_name().to_string()),
        }
    }

    fn invalid(reason: InvalidReason, cert: &Certificate) -> Self {
        ValidationOutcome::Invalid {
            reason,
            cert_with_error: Some(cert.clone()),
            crl_with_error: None,
        }
    }

    /// Classify a revocation failure of `cert`.
    pub fn from_revocation_failure(cert: &Certificate, failure: RevocationFailure) -> Self {
        let cert_with_error = cert.clone();
        match failure {
            RevocationFailure::Revoked { revoked_at, crl } => ValidationOutcome::Invalid {
                reason: InvalidReason::Revoked(revoked_at),
                cert_with_error: Some(cert_with_error),
                crl_with_error: crl,
            },
            RevocationFailure::InvalidCrlSignature { crl, reason } => ValidationOutcome::Invalid {
                reason: InvalidReason::InvalidCrl(reason),
                cert_with_error: Some(cert_with_error),
                crl_with_error: Some(crl),
            },
            RevocationFailure::CrlUnavailable { message } => ValidationOutcome::CrlMissing {
                cert_with_error,
                detail: message,
            },
            failure @ (RevocationFailure::CrlNotFound { .. }
            | RevocationFailure::WithoutResponse
            | RevocationFailure::WithoutResponseForCertificate { .. }
            | RevocationFailure::UnknownStatus { .. }) => {
                ValidationOutcome::RevocationStatusUndetermined {
                    crl_with_error: failure.crl().cloned(),
                    detail: failure.to_string(),
                    cert_with_error,
                }
            }
        }
    }
}

pub struct ChainValidator<'a> {
    pool: &'a dyn CertificatePool,
    evidence: &'a RevocationEvidenceIndex,
    aia: Option<&'a dyn AiaFetcher>,
    at: OffsetDateTime,
}

impl<'a> ChainValidator<'a> {
    pub fn new(
        pool: &'a dyn CertificatePool,
        evidence: &'a RevocationEvidenceIndex,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            pool,
            evidence,
            aia: None,
            at,
        }
    }

    pub fn with_aia(mut self, aia: Option<&'a dyn AiaFetcher>) -> Self {
        self.aia = aia;
        self
    }

    pub fn reference_time(&self) -> OffsetDateTime {
        self.at
    }

    pub fn validate(
        &self,
        path: &CertPath,
        anchors: &TrustAnchorStore,
        requirement: &RevocationRequirement,
    ) -> ValidationOutcome {
        let end_entity = path.end_entity();
        let strategy = match requirement::resolve(requirement) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!("✗ {e}");
                return ValidationOutcome::invalid(e.into(), end_entity);
            }
        };
        debug!(
            "validating {} ({} certificate(s)) at {} with {strategy}",
            end_entity.subject_name(),
            path.len(),
            self.at
        );

        let anchor = match self.select_anchor(path, anchors) {
            Ok(anchor) => anchor,
            Err(outcome) => return outcome,
        };

        let mut chain = path.certificates().to_vec();
        chain.push(anchor);
        for (position, pair) in chain.windows(2).enumerate() {
            let (subject, issuer) = (&pair[0], &pair[1]);
            let role = if position == 0 {
                ChainRole::EndEntity
            } else {
                ChainRole::Ca
            };
            let check_revocation = role == ChainRole::EndEntity || !strategy.is_mixed();
            if let Err(outcome) = self.check_pair(subject, issuer, strategy, role, check_revocation)
            {
                return outcome;
            }
        }

        if strategy.is_mixed() && path.len() > 1 {
            if let Err(outcome) = self.check_ca_portion(path, anchors, strategy) {
                return outcome;
            }
        }

        info!("✓ certification path of {} is valid", end_entity.subject_name());
        ValidationOutcome::Valid
    }

    /// Any anchor named by the last certificate's issuer whose key verifies it.
    fn select_anchor(
        &self,
        path: &CertPath,
        anchors: &TrustAnchorStore,
    ) -> Result<Certificate, ValidationOutcome> {
        let last = &path.certificates()[path.len() - 1];
        let mut first_error = None;
        let preferred = std::iter::once(path.anchor())
            .filter(|a| anchors.contains(a.certificate()))
            .chain(anchors.anchors_for_issuer(last.issuer_raw()));
        for anchor in preferred {
            let candidate = anchor.certificate();
            if !last.is_named_issuer(candidate) {
                continue;
            }
            match last.verify_signed_by(candidate) {
                Ok(()) => return Ok(candidate.clone()),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        let reason = match first_error {
            Some(e) => signature_reason(e),
            None => InvalidReason::NoTrustAnchor {
                issuer: last.issuer_name().to_string(),
            },
        };
        warn!("✗ {}: {reason}", last.subject_name());
        Err(ValidationOutcome::invalid(reason, last))
    }

    fn check_pair(
        &self,
        subject: &Certificate,
        issuer: &Certificate,
        strategy: Strategy,
        role: ChainRole,
        check_revocation: bool,
    ) -> Result<(), ValidationOutcome> {
        if !subject.is_named_issuer(issuer) {
            return Err(ValidationOutcome::invalid(InvalidReason::NameChaining, subject));
        }
        if let Err(e) = subject.verify_signed_by(issuer) {
            warn!("✗ signature of {} does not verify: {e}", subject.subject_name());
            return Err(ValidationOutcome::invalid(signature_reason(e), subject));
        }
        if subject.is_expired_at(self.at) {
            warn!("✗ {} expired at {}", subject.subject_name(), subject.not_after());
            return Err(ValidationOutcome::Expired {
                cert_with_error: subject.clone(),
            });
        }
        if subject.is_not_yet_valid_at(self.at) {
            warn!("✗ {} not valid before {}", subject.subject_name(), subject.not_before());
            return Err(ValidationOutcome::NotYetValid {
                cert_with_error: subject.clone(),
            });
        }
        // A trust anchor used as its own path is not revocation checked.
        if !check_revocation || subject == issuer {
            return Ok(());
        }
        let method = strategy.for_role(role);
        debug!("checking {} ({role}) with {method:?}", subject.subject_name());
        MethodChecker::new(method, self.evidence, self.at)
            .check(subject, issuer)
            .map_err(|failure| ValidationOutcome::from_revocation_failure(subject, failure))
    }

    /// Rebuild from `path[1]` with the CA method checking every certificate placed.
    fn check_ca_portion(
        &self,
        path: &CertPath,
        anchors: &TrustAnchorStore,
        strategy: Strategy,
    ) -> Result<(), ValidationOutcome> {
        let first_ca = &path.certificates()[1];
        // The path may come from outside the pool.
        self.pool.add_certificates(path.ca_certificates(), false);
        let checker = MethodChecker::new(strategy.ca, self.evidence, self.at);
        let builder = ChainBuilder::new(self.pool, anchors).with_aia(self.aia);
        match builder.build(first_ca, self.at, Some(&checker as &dyn RevocationCheck)) {
            Ok(rebuilt) => {
                debug!(
                    "✓ CA portion of {} certificate(s) passed {:?} checks",
                    rebuilt.len(),
                    strategy.ca
                );
                Ok(())
            }
            Err(PathError::Revocation {
                certificate,
                failure,
            }) => Err(ValidationOutcome::from_revocation_failure(
                &certificate,
                failure,
            )),
            Err(PathError::Expired { .. }) => Err(ValidationOutcome::Expired {
                cert_with_error: first_ca.clone(),
            }),
            Err(PathError::NotYetValid { .. }) => Err(ValidationOutcome::NotYetValid {
                cert_with_error: first_ca.clone(),
            }),
            Err(PathError::NoSuchAlgorithm(alg)) => Err(ValidationOutcome::invalid(
                InvalidReason::UnsupportedAlgorithm(alg),
                first_ca,
            )),
            Err(e) => {
                warn!("✗ CA portion rebuild failed: {e}");
                Err(ValidationOutcome::invalid(
                    InvalidReason::Unspecified(format!("CA path could not be rebuilt: {e}")),
                    first_ca,
                ))
            }
        }
    }
}

fn signature_reason(err: SignatureError) -> InvalidReason {
    match err {
        SignatureError::UnsupportedAlgorithm(alg) => InvalidReason::UnsupportedAlgorithm(alg),
        SignatureError::Invalid => InvalidReason::SignatureMismatch,
        SignatureError::Malformed(msg) => {
            InvalidReason::Unspecified(format!("malformed signature: {msg}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_of_valid_has_no_error_fields() {
        let summary = ValidationOutcome::Valid.summary();
        assert_eq!(summary.status, OutcomeStatus::Valid);
        assert!(summary.detail.is_none());
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            serde_json::json!({ "status": "valid" })
        );
    }

    #[test]
    fn test_configuration_error_is_invalid() {
        let reason: InvalidReason = ConfigurationError::UnknownValidationMethod {
            role: ChainRole::Ca,
        }
        .into();
        assert_eq!(
            reason.to_string(),
            "unknown certification path validation method for CA certificates"
        );
    }
}
