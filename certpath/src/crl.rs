// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Certificate revocation lists.

use std::{path::Path, sync::Arc};

use ::pem::parse_many;
use anyhow::{bail, Context, Result};
use fs_err as fs;
use ::time::OffsetDateTime;
use x509_parser::{prelude::*, revocation_list::CertificateRevocationList};

use crate::{
    cert::{Certificate, SignatureError},
    digest::DigestAlgorithm,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: Vec<u8>,
    pub revocation_date: OffsetDateTime,
}

#[derive(Clone)]
pub struct Crl(Arc<CrlInner>);

struct CrlInner {
    der: Vec<u8>,
    issuer: Vec<u8>,
    issuer_name: String,
    this_update: OffsetDateTime,
    next_update: Option<OffsetDateTime>,
    crl_number: Option<String>,
    revoked: Vec<RevokedEntry>,
}

impl Crl {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, crl) =
            CertificateRevocationList::from_der(der).context("failed to parse CRL")?;
        if !rest.is_empty() {
            bail!("trailing {} bytes after CRL", rest.len());
        }
        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| RevokedEntry {
                serial: entry.raw_serial().to_vec(),
                revocation_date: entry.revocation_date.to_datetime(),
            })
            .collect();
        Ok(Self(Arc::new(CrlInner {
            der: der.to_vec(),
            issuer: crl.issuer().as_raw().to_vec(),
            issuer_name: crl.issuer().to_string(),
            this_update: crl.last_update().to_datetime(),
            next_update: crl.next_update().map(|t| t.to_datetime()),
            crl_number: crl.crl_number().map(|n| n.to_string()),
            revoked,
        })))
    }

    /// Accepts either DER or a PEM `X509 CRL` block.
    pub fn from_pem_or_der(bytes: &[u8]) -> Result<Vec<Self>> {
        if !bytes.starts_with(b"-----BEGIN") {
            return Ok(vec![Self::from_der(bytes)?]);
        }
        parse_many(bytes)
            .context("failed to parse PEM")?
            .iter()
            .filter(|item| item.tag() == "X509 CRL")
            .map(|item| Self::from_der(item.contents()))
            .collect()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        Self::from_pem_or_der(&bytes).with_context(|| format!("invalid CRL in {}", path.display()))
    }

    pub fn der(&self) -> &[u8] {
        &self.0.der
    }

    pub fn issuer_raw(&self) -> &[u8] {
        &self.0.issuer
    }

    pub fn issuer_name(&self) -> &str {
        &self.0.issuer_name
    }

    pub fn this_update(&self) -> OffsetDateTime {
        self.0.this_update
    }

    pub fn next_update(&self) -> Option<OffsetDateTime> {
        self.0.next_update
    }

    /// Decimal rendering of the cRLNumber extension.
    pub fn crl_number(&self) -> Option<&str> {
        self.0.crl_number.as_deref()
    }

    pub fn revoked(&self) -> &[RevokedEntry] {
        &self.0.revoked
    }

    /// `thisUpdate <= at < nextUpdate`; a CRL without nextUpdate never goes stale.
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.0.this_update <= at && self.0.next_update.map_or(true, |next| at < next)
    }

    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_raw() == issuer.subject_raw()
    }

    pub fn covers(&self, cert: &Certificate) -> bool {
        self.issuer_raw() == cert.issuer_raw()
    }

    /// Revocation date of `serial`, if listed.
    pub fn revocation_date_of(&self, serial: &[u8]) -> Option<OffsetDateTime> {
        self.0
            .revoked
            .iter()
            .find(|entry| entry.serial == serial)
            .map(|entry| entry.revocation_date)
    }

    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), SignatureError> {
        let (_, crl) = CertificateRevocationList::from_der(self.der())
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        let (_, spki) = SubjectPublicKeyInfo::from_der(issuer.public_key_info())
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        crl.verify_signature(&spki)
            .map_err(|e| SignatureError::from_x509(e, &crl.signature_algorithm.algorithm))
    }

    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(self.der())
    }
}

impl PartialEq for Crl {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.der == other.0.der
    }
}

impl Eq for Crl {}

impl std::hash::Hash for Crl {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.der.hash(state);
    }
}

impl std::fmt::Debug for Crl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crl")
            .field("issuer", &self.0.issuer_name)
            .field("crl_number", &self.0.crl_number)
            .field("this_update", &self.0.this_update)
            .field("next_update", &self.0.next_update)
            .field("revoked", &self.0.revoked.len())
            .finish()
    }
}
