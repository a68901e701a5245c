// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! CRL and OCSP status checks for a single (certificate, issuer) pair.

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    cert::{Certificate, SignatureError},
    crl::Crl,
    evidence::RevocationEvidenceIndex,
    ocsp::{CertId, OcspCertStatus},
    requirement::CheckMethod,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RevocationFailure {
    #[error("certificate revoked at {revoked_at}")]
    Revoked {
        revoked_at: OffsetDateTime,
        crl: Option<Crl>,
    },
    #[error("no CRL found for issuer {issuer}")]
    CrlNotFound { issuer: String },
    #[error("CRL could not be accessed: {message}")]
    CrlUnavailable { message: String },
    #[error("CRL signature does not verify: {reason}")]
    InvalidCrlSignature { crl: Crl, reason: SignatureError },
    #[error("no OCSP response available")]
    WithoutResponse,
    #[error("no OCSP response for certificate serial {serial}")]
    WithoutResponseForCertificate { serial: String },
    #[error("OCSP responder reports unknown status for serial {serial}")]
    UnknownStatus { serial: String },
}

impl RevocationFailure {
    /// The CRL involved in the failure, if any.
    pub fn crl(&self) -> Option<&Crl> {
        match self {
            RevocationFailure::Revoked { crl, .. } => crl.as_ref(),
            RevocationFailure::InvalidCrlSignature { crl, .. } => Some(crl),
            _ => None,
        }
    }
}

/// Revocation check of `cert`, issued by `issuer`.
pub trait RevocationCheck {
    fn check(&self, cert: &Certificate, issuer: &Certificate) -> Result<(), RevocationFailure>;
}

#[derive(Debug, Clone, Copy)]
pub struct CrlChecker<'a> {
    index: &'a RevocationEvidenceIndex,
    at: OffsetDateTime,
}

impl<'a> CrlChecker<'a> {
    pub fn new(index: &'a RevocationEvidenceIndex, at: OffsetDateTime) -> Self {
        Self { index, at }
    }

    /// A CRL of `cert`'s issuer valid at the reference time, otherwise any CRL of that
    /// issuer regardless of its update window.
    pub fn find_crl(&self, cert: &Certificate) -> Result<Crl, RevocationFailure> {
        let unavailable = |e: anyhow::Error| RevocationFailure::CrlUnavailable {
            message: format!("{e:#}"),
        };
        if let Some(crl) = self.index.crl_for(cert, Some(self.at)).map_err(unavailable)? {
            return Ok(crl);
        }
        debug!(
            "no CRL for {} valid at {}, retrying without time window",
            cert.issuer_name(),
            self.at
        );
        match self.index.crl_for(cert, None).map_err(unavailable)? {
            Some(crl) => {
                warn!(
                    "using CRL of {} outside its update window ({} - {:?})",
                    crl.issuer_name(),
                    crl.this_update(),
                    crl.next_update()
                );
                Ok(crl)
            }
            None => Err(RevocationFailure::CrlNotFound {
                issuer: cert.issuer_name().to_string(),
            }),
        }
    }
}

impl RevocationCheck for CrlChecker<'_> {
    fn check(&self, cert: &Certificate, issuer: &Certificate) -> Result<(), RevocationFailure> {
        let crl = self.find_crl(cert)?;
        if let Err(reason) = crl.verify_signed_by(issuer) {
            warn!("✗ CRL of {} failed signature check: {reason}", crl.issuer_name());
            return Err(RevocationFailure::InvalidCrlSignature { crl, reason });
        }
        match crl.revocation_date_of(cert.serial()) {
            Some(revoked_at) if revoked_at <= self.at => {
                warn!(
                    "✗ certificate {} (serial {}) revoked at {revoked_at}",
                    cert.subject_name(),
                    cert.serial_hex()
                );
                Err(RevocationFailure::Revoked {
                    revoked_at,
                    crl: Some(crl),
                })
            }
            Some(revoked_at) => {
                debug!(
                    "certificate {} revoked at {revoked_at}, after the reference time",
                    cert.subject_name()
                );
                Ok(())
            }
            None => {
                debug!("✓ CRL check passed for {}", cert.subject_name());
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OcspChecker<'a> {
    index: &'a RevocationEvidenceIndex,
    at: OffsetDateTime,
}

impl<'a> OcspChecker<'a> {
    pub fn new(index: &'a RevocationEvidenceIndex, at: OffsetDateTime) -> Self {
        Self { index, at }
    }
}

impl RevocationCheck for OcspChecker<'_> {
    fn check(&self, cert: &Certificate, issuer: &Certificate) -> Result<(), RevocationFailure> {
        if !self.index.has_ocsp_responses() {
            return Err(RevocationFailure::WithoutResponse);
        }
        let cert_id = CertId::new(cert, issuer);
        match self.index.ocsp_status(&cert_id) {
            None => Err(RevocationFailure::WithoutResponseForCertificate {
                serial: cert.serial_hex(),
            }),
            Some(OcspCertStatus::Revoked { revocation_time }) if revocation_time <= self.at => {
                warn!(
                    "✗ OCSP: certificate {} revoked at {revocation_time}",
                    cert.subject_name()
                );
                Err(RevocationFailure::Revoked {
                    revoked_at: revocation_time,
                    crl: None,
                })
            }
            Some(OcspCertStatus::Unknown) => Err(RevocationFailure::UnknownStatus {
                serial: cert.serial_hex(),
            }),
            Some(_) => {
                debug!("✓ OCSP check passed for {}", cert.subject_name());
                Ok(())
            }
        }
    }
}

/// The checker a [`CheckMethod`] calls for.
#[derive(Debug, Clone, Copy)]
pub enum MethodChecker<'a> {
    Crl(CrlChecker<'a>),
    Ocsp(OcspChecker<'a>),
    Both(CrlChecker<'a>, OcspChecker<'a>),
}

impl<'a> MethodChecker<'a> {
    pub fn new(
        method: CheckMethod,
        index: &'a RevocationEvidenceIndex,
        at: OffsetDateTime,
    ) -> Self {
        let crl = CrlChecker::new(index, at);
        let ocsp = OcspChecker::new(index, at);
        match method {
            CheckMethod::Crl => MethodChecker::Crl(crl),
            CheckMethod::Ocsp => MethodChecker::Ocsp(ocsp),
            CheckMethod::Both => MethodChecker::Both(crl, ocsp),
        }
    }
}

impl RevocationCheck for MethodChecker<'_> {
    fn check(&self, cert: &Certificate, issuer: &Certificate) -> Result<(), RevocationFailure> {
        match self {
            MethodChecker::Crl(crl) => crl.check(cert, issuer),
            MethodChecker::Ocsp(ocsp) => ocsp.check(cert, issuer),
            MethodChecker::Both(crl, ocsp) => {
                crl.check(cert, issuer)?;
                ocsp.check(cert, issuer)
            }
        }
    }
}
