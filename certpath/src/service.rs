// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Validation session tying the pool, anchors and evidence together.

use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    builder::{CertPath, ChainBuilder, PathError},
    cert::Certificate,
    digest::DigestAlgorithm,
    evidence::RevocationEvidenceIndex,
    pool::{AiaFetcher, CertificatePool},
    policy::{PolicyRole, SignaturePolicy},
    report::ValidationReport,
    requirement::RevocationRequirement,
    trust::TrustAnchorStore,
    validator::{ChainValidator, InvalidReason, ValidationOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Temporal {
    Current,
    Expired,
    NotYetValid,
}

impl Temporal {
    fn of(cert: &Certificate, at: OffsetDateTime) -> Self {
        if cert.is_expired_at(at) {
            Temporal::Expired
        } else if cert.is_not_yet_valid_at(at) {
            Temporal::NotYetValid
        } else {
            Temporal::Current
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PathKey {
    target: Vec<u8>,
    temporal: Temporal,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Best-effort path; present for temporal failures too.
    pub path: Option<CertPath>,
    pub outcome: ValidationOutcome,
    pub reference_time: OffsetDateTime,
}

pub struct CertificateValidationService {
    pool: Arc<dyn CertificatePool>,
    anchors: TrustAnchorStore,
    evidence: Arc<RevocationEvidenceIndex>,
    aia: Option<Arc<dyn AiaFetcher>>,
    paths: DashMap<PathKey, Result<CertPath, PathError>>,
}

impl CertificateValidationService {
    pub fn new(
        pool: Arc<dyn CertificatePool>,
        anchors: TrustAnchorStore,
        evidence: Arc<RevocationEvidenceIndex>,
    ) -> Self {
        Self {
            pool,
            anchors,
            evidence,
            aia: None,
            paths: DashMap::new(),
        }
    }

    pub fn with_aia(mut self, aia: Arc<dyn AiaFetcher>) -> Self {
        self.aia = Some(aia);
        self
    }

    pub fn anchors(&self) -> &TrustAnchorStore {
        &self.anchors
    }

    pub fn evidence(&self) -> &RevocationEvidenceIndex {
        &self.evidence
    }

    pub fn pool(&self) -> &dyn CertificatePool {
        &*self.pool
    }

    /// Certificates found inside a signature, made available to path building.
    pub fn add_certificates(&self, certs: &[Certificate]) {
        self.pool.add_certificates(certs, false);
    }

    /// Build a path for `target`, reusing earlier results.
    ///
    /// Only successful builds and temporal fallbacks are cached: a failed build may
    /// succeed once more certificates are added.
    pub fn build_path(
        &self,
        target: &Certificate,
        at: OffsetDateTime,
    ) -> Result<CertPath, PathError> {
        let key = PathKey {
            target: target.digest(DigestAlgorithm::Sha256),
            temporal: Temporal::of(target, at),
        };
        if let Some(cached) = self.paths.get(&key) {
            debug!("path cache hit for {}", target.subject_name());
            return cached.value().clone();
        }
        let result = ChainBuilder::new(&*self.pool, &self.anchors)
            .with_aia(self.aia.as_deref())
            .build(target, at, None);
        if result.is_ok() || result.as_ref().is_err_and(PathError::is_temporal) {
            self.paths.insert(key, result.clone());
        }
        result
    }

    pub fn validate(
        &self,
        target: &Certificate,
        requirement: &RevocationRequirement,
        at: OffsetDateTime,
    ) -> ValidationResult {
        let (path, outcome) = match self.build_path(target, at) {
            Ok(path) => {
                let outcome = ChainValidator::new(&*self.pool, &self.evidence, at)
                    .with_aia(self.aia.as_deref())
                    .validate(&path, &self.anchors, requirement);
                (Some(path), outcome)
            }
            Err(PathError::Expired { path }) => (
                Some(path),
                ValidationOutcome::Expired {
                    cert_with_error: target.clone(),
                },
            ),
            Err(PathError::NotYetValid { path }) => (
                Some(path),
                ValidationOutcome::NotYetValid {
                    cert_with_error: target.clone(),
                },
            ),
            Err(e) => {
                let reason = match e {
                    PathError::NoSuchAlgorithm(alg) => InvalidReason::UnsupportedAlgorithm(alg),
                    PathError::NoPathFound => InvalidReason::NoTrustAnchor {
                        issuer: target.issuer_name().to_string(),
                    },
                    e => InvalidReason::Unspecified(e.to_string()),
                };
                (
                    None,
                    ValidationOutcome::Invalid {
                        reason,
                        cert_with_error: Some(target.clone()),
                        crl_with_error: None,
                    },
                )
            }
        };
        info!(
            "validation of {} at {at}: {:?}",
            target.subject_name(),
            outcome.status()
        );
        ValidationResult {
            path,
            outcome,
            reference_time: at,
        }
    }

    /// Validate with the requirement a policy sets for `role`.
    pub fn validate_with_policy(
        &self,
        target: &Certificate,
        policy: &dyn SignaturePolicy,
        role: PolicyRole,
        at: OffsetDateTime,
    ) -> ValidationResult {
        self.validate(target, &policy.revocation_requirement_for(role), at)
    }

    pub fn report(&self, result: &ValidationResult) -> ValidationReport {
        ValidationReport::new(
            result.path.as_ref(),
            &result.outcome,
            &*self.pool,
            &self.evidence,
            &self.anchors,
            result.reference_time,
        )
    }
}
