// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Parsed X.509 certificates.
//!
//! A [`Certificate`] keeps the DER encoding together with the fields that path building,
//! revocation checking and reporting look at. Names are compared by their raw DER
//! encoding; the RFC 4514 rendering is only used for logs and reports.

use std::{path::Path, sync::Arc};

use ::pem::parse_many;
use anyhow::{bail, Context, Result};
use fs_err as fs;
use thiserror::Error;
use ::time::OffsetDateTime;
use tracing::debug;
use x509_parser::{
    der_parser::oid::Oid,
    error::X509Error,
    extensions::{DistributionPointName, GeneralName, ParsedExtension},
    prelude::*,
};

use crate::digest::DigestAlgorithm;

const OID_CA_ISSUERS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 48, 2];

/// Why a signature over a certificate, CRL or OCSP response did not verify.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("signature does not verify under the issuer key")]
    Invalid,
    #[error("malformed encoding: {0}")]
    Malformed(String),
}

impl SignatureError {
    pub(crate) fn from_x509(err: X509Error, algorithm: &Oid) -> Self {
        match err {
            X509Error::SignatureUnsupportedAlgorithm => {
                SignatureError::UnsupportedAlgorithm(algorithm.to_id_string())
            }
            _ => SignatureError::Invalid,
        }
    }
}

#[derive(Clone)]
pub struct Certificate(Arc<CertificateInner>);

struct CertificateInner {
    der: Vec<u8>,
    subject: Vec<u8>,
    issuer: Vec<u8>,
    subject_name: String,
    issuer_name: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    serial: Vec<u8>,
    public_key_info: Vec<u8>,
    public_key_bits: Vec<u8>,
    ca_issuers: Vec<String>,
    crl_distribution_points: Vec<String>,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (rest, cert) = X509Certificate::from_der(der).context("failed to parse certificate")?;
        if !rest.is_empty() {
            bail!("trailing {} bytes after certificate", rest.len());
        }

        let mut ca_issuers = Vec::new();
        let mut crl_distribution_points = Vec::new();
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for access_desc in &aia.accessdescs {
                        let oid: Vec<u64> = match access_desc.access_method.iter() {
                            Some(iter) => iter.collect(),
                            None => continue,
                        };
                        if oid != OID_CA_ISSUERS {
                            continue;
                        }
                        if let GeneralName::URI(uri) = &access_desc.access_location {
                            ca_issuers.push(uri.to_string());
                        }
                    }
                }
                ParsedExtension::CRLDistributionPoints(points) => {
                    for point in points.points.iter() {
                        let Some(DistributionPointName::FullName(names)) =
                            &point.distribution_point
                        else {
                            continue;
                        };
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_distribution_points.push(uri.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let spki = cert.public_key();
        Ok(Self(Arc::new(CertificateInner {
            der: der.to_vec(),
            subject: cert.subject().as_raw().to_vec(),
            issuer: cert.issuer().as_raw().to_vec(),
            subject_name: cert.subject().to_string(),
            issuer_name: cert.issuer().to_string(),
            not_before: cert.validity().not_before.to_datetime(),
            not_after: cert.validity().not_after.to_datetime(),
            serial: cert.raw_serial().to_vec(),
            public_key_info: spki.raw.to_vec(),
            public_key_bits: spki.subject_public_key.data.to_vec(),
            ca_issuers,
            crl_distribution_points,
        })))
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle.
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Vec<Self>> {
        let items = parse_many(pem).context("failed to parse PEM")?;
        items
            .iter()
            .filter(|item| item.tag() == "CERTIFICATE")
            .map(|item| Self::from_der(item.contents()))
            .collect()
    }

    /// Load certificates from a PEM bundle or a single DER file.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let certs = if bytes.starts_with(b"-----BEGIN") {
            Self::from_pem_bundle(&bytes)?
        } else {
            vec![Self::from_der(&bytes)?]
        };
        debug!("loaded {} certificate(s) from {}", certs.len(), path.display());
        Ok(certs)
    }

    pub fn der(&self) -> &[u8] {
        &self.0.der
    }

    /// Raw DER encoding of the subject name.
    pub fn subject_raw(&self) -> &[u8] {
        &self.0.subject
    }

    /// Raw DER encoding of the issuer name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.0.issuer
    }

    pub fn subject_name(&self) -> &str {
        &self.0.subject_name
    }

    pub fn issuer_name(&self) -> &str {
        &self.0.issuer_name
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.0.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.0.not_after
    }

    pub fn serial(&self) -> &[u8] {
        &self.0.serial
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.0.serial)
    }

    /// DER encoding of the SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> &[u8] {
        &self.0.public_key_info
    }

    /// Contents of the subjectPublicKey BIT STRING.
    pub fn public_key_bits(&self) -> &[u8] {
        &self.0.public_key_bits
    }

    pub fn ca_issuers_urls(&self) -> &[String] {
        &self.0.ca_issuers
    }

    pub fn crl_distribution_points(&self) -> &[String] {
        &self.0.crl_distribution_points
    }

    pub fn is_expired_at(&self, at: OffsetDateTime) -> bool {
        self.0.not_after < at
    }

    pub fn is_not_yet_valid_at(&self, at: OffsetDateTime) -> bool {
        self.0.not_before > at
    }

    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        !self.is_expired_at(at) && !self.is_not_yet_valid_at(at)
    }

    /// Whether `issuer`'s subject is this certificate's issuer name.
    pub fn is_named_issuer(&self, issuer: &Certificate) -> bool {
        self.issuer_raw() == issuer.subject_raw()
    }

    /// Verify this certificate's signature with the public key of `issuer`.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), SignatureError> {
        let (_, subject) = X509Certificate::from_der(self.der())
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        let (_, spki) = SubjectPublicKeyInfo::from_der(issuer.public_key_info())
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        subject
            .verify_signature(Some(&spki))
            .map_err(|e| SignatureError::from_x509(e, &subject.signature_algorithm.algorithm))
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject_raw() == self.issuer_raw()
    }

    /// Self-issued and verifiable under its own key.
    pub fn is_self_signed(&self) -> bool {
        self.is_self_issued() && self.verify_signed_by(self).is_ok()
    }

    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(self.der())
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.der == other.0.der
    }
}

impl Eq for Certificate {}

impl std::hash::Hash for Certificate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.der.hash(state);
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.0.subject_name)
            .field("issuer", &self.0.issuer_name)
            .field("serial", &self.serial_hex())
            .finish()
    }
}
