// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Certification path construction.
//!
//! Paths are searched depth-first from the target towards a self-signed trust anchor.
//! Issuer candidates come from the certificate pool, with AIA download as a fallback
//! when the pool knows no certificate carrying the issuer name.

use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::{
    cert::{Certificate, SignatureError},
    pool::{AiaFetcher, CertificatePool},
    revocation::{RevocationCheck, RevocationFailure},
    trust::{TrustAnchor, TrustAnchorStore},
};

pub const MAX_PATH_DEPTH: usize = 16;

/// Leaf-first certificates ending just before the trust anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPath {
    certificates: Vec<Certificate>,
    anchor: TrustAnchor,
}

impl CertPath {
    /// Checks that the path is non-empty and chains by name up to `anchor`.
    pub fn new(certificates: Vec<Certificate>, anchor: TrustAnchor) -> Result<Self, PathError> {
        if certificates.is_empty() {
            return Err(PathError::NoPathFound);
        }
        for (position, pair) in certificates.windows(2).enumerate() {
            if !pair[0].is_named_issuer(&pair[1]) {
                return Err(PathError::NameChaining { position });
            }
        }
        let last = certificates.len() - 1;
        if !certificates[last].is_named_issuer(anchor.certificate()) {
            return Err(PathError::NameChaining { position: last });
        }
        Ok(Self {
            certificates,
            anchor,
        })
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn end_entity(&self) -> &Certificate {
        &self.certificates[0]
    }

    /// Everything after the end entity.
    pub fn ca_certificates(&self) -> &[Certificate] {
        &self.certificates[1..]
    }

    pub fn anchor(&self) -> &TrustAnchor {
        &self.anchor
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// (subject, issuer) pairs, the last one issued by the anchor.
    pub fn pairs(&self) -> impl Iterator<Item = (&Certificate, &Certificate)> {
        self.certificates.iter().enumerate().map(move |(i, cert)| {
            let issuer = self
                .certificates
                .get(i + 1)
                .unwrap_or(self.anchor.certificate());
            (cert, issuer)
        })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("certification path could not be built")]
    NoPathFound,
    #[error("invalid parameters for path building: {0}")]
    InvalidAlgorithmParameters(String),
    #[error("unknown algorithm for path building: {0}")]
    NoSuchAlgorithm(String),
    #[error("certificate {} is expired", path.end_entity().subject_name())]
    Expired { path: CertPath },
    #[error("certificate {} is not valid yet", path.end_entity().subject_name())]
    NotYetValid { path: CertPath },
    #[error("revocation check failed for {}: {failure}", certificate.subject_name())]
    Revocation {
        certificate: Certificate,
        failure: RevocationFailure,
    },
    #[error("issuer download failed: {message}")]
    IssuerUnavailable { message: String },
    #[error("certificate at position {position} does not chain to its successor")]
    NameChaining { position: usize },
}

impl PathError {
    /// Best-effort path carried by temporal failures.
    pub fn path(&self) -> Option<&CertPath> {
        match self {
            PathError::Expired { path } | PathError::NotYetValid { path } => Some(path),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        self.path().is_some()
    }
}

pub struct ChainBuilder<'a> {
    pool: &'a dyn CertificatePool,
    anchors: &'a TrustAnchorStore,
    aia: Option<&'a dyn AiaFetcher>,
    max_depth: usize,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(pool: &'a dyn CertificatePool, anchors: &'a TrustAnchorStore) -> Self {
        Self {
            pool,
            anchors,
            aia: None,
            max_depth: MAX_PATH_DEPTH,
        }
    }

    pub fn with_aia(mut self, aia: Option<&'a dyn AiaFetcher>) -> Self {
        self.aia = aia;
        self
    }

    /// Build a path from `target` to a self-signed anchor.
    ///
    /// `revocation` enables revocation checking of every certificate placed on the path.
    /// A target outside its validity window at `at` is built at notBefore + 1 day and the
    /// path is returned inside [`PathError::Expired`] or [`PathError::NotYetValid`].
    pub fn build(
        &self,
        target: &Certificate,
        at: OffsetDateTime,
        revocation: Option<&dyn RevocationCheck>,
    ) -> Result<CertPath, PathError> {
        if self.anchors.self_signed_roots().next().is_none() {
            return Err(PathError::InvalidAlgorithmParameters(
                "no self-signed trust anchor configured".into(),
            ));
        }

        let expired = target.is_expired_at(at);
        if !expired && !target.is_not_yet_valid_at(at) {
            return self.search(target, at, revocation);
        }

        let assumed = target.not_before() + Duration::days(1);
        warn!(
            "target {} is {} at {at}, building at {assumed} instead",
            target.subject_name(),
            if expired { "expired" } else { "not yet valid" }
        );
        let path = self.search(target, assumed, revocation)?;
        if expired {
            Err(PathError::Expired { path })
        } else {
            Err(PathError::NotYetValid { path })
        }
    }

    fn search(
        &self,
        target: &Certificate,
        at: OffsetDateTime,
        revocation: Option<&dyn RevocationCheck>,
    ) -> Result<CertPath, PathError> {
        let mut path = vec![target.clone()];
        let mut last_error = None;
        match self.extend(&mut path, at, revocation, &mut last_error) {
            Some(anchor) => {
                debug!(
                    "✓ built path of {} certificate(s) to {}",
                    path.len(),
                    anchor.certificate().subject_name()
                );
                Ok(CertPath {
                    certificates: path,
                    anchor,
                })
            }
            None => {
                let err = last_error.unwrap_or(PathError::NoPathFound);
                warn!("✗ no path for {}: {err}", target.subject_name());
                Err(err)
            }
        }
    }

    fn extend(
        &self,
        path: &mut Vec<Certificate>,
        at: OffsetDateTime,
        revocation: Option<&dyn RevocationCheck>,
        last_error: &mut Option<PathError>,
    ) -> Option<TrustAnchor> {
        let current = path.last()?.clone();

        for root in self.anchors.roots_for_issuer(current.issuer_raw()) {
            if self.accept_issuer(&current, root.certificate(), revocation, last_error) {
                return Some(root.clone());
            }
        }

        if path.len() >= self.max_depth {
            debug!("path depth limit {} reached", self.max_depth);
            return None;
        }

        for candidate in self.candidates(&current, at, last_error) {
            // Untrusted roots and loops never extend a path.
            if candidate.is_self_issued() || path.contains(&candidate) {
                continue;
            }
            if !self.accept_issuer(&current, &candidate, revocation, last_error) {
                continue;
            }
            path.push(candidate);
            if let Some(anchor) = self.extend(path, at, revocation, last_error) {
                return Some(anchor);
            }
            path.pop();
        }
        None
    }

    fn accept_issuer(
        &self,
        cert: &Certificate,
        issuer: &Certificate,
        revocation: Option<&dyn RevocationCheck>,
        last_error: &mut Option<PathError>,
    ) -> bool {
        match cert.verify_signed_by(issuer) {
            Ok(()) => {}
            Err(SignatureError::UnsupportedAlgorithm(alg)) => {
                *last_error = Some(PathError::NoSuchAlgorithm(alg));
                return false;
            }
            Err(e) => {
                debug!(
                    "{} is not signed by {}: {e}",
                    cert.subject_name(),
                    issuer.subject_name()
                );
                return false;
            }
        }
        let Some(check) = revocation else {
            return true;
        };
        // Trust anchors themselves are never revocation checked.
        if cert == issuer {
            return true;
        }
        match check.check(cert, issuer) {
            Ok(()) => true,
            Err(failure) => {
                *last_error = Some(PathError::Revocation {
                    certificate: cert.clone(),
                    failure,
                });
                false
            }
        }
    }

    fn candidates(
        &self,
        cert: &Certificate,
        at: OffsetDateTime,
        last_error: &mut Option<PathError>,
    ) -> Vec<Certificate> {
        let mut candidates = self.pool.issuer_candidates(cert);
        if candidates.is_empty() {
            if let Some(aia) = self.aia {
                match aia.download_chain(cert) {
                    Ok(downloaded) => {
                        self.pool.add_certificates(&downloaded, true);
                        candidates = self.pool.issuer_candidates(cert);
                    }
                    Err(e) => {
                        warn!("✗ AIA download for {} failed: {e}", cert.subject_name());
                        *last_error = Some(PathError::IssuerUnavailable {
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        // Prefer issuers valid at the reference time; the sort is stable.
        candidates.sort_by_key(|c| !c.is_valid_at(at));
        candidates
    }
}
