// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Matching of hash references against certificates and revocation evidence.
//!
//! Reference attributes carry digests of certificates, CRLs and OCSP responses; value
//! attributes carry the material itself. Both must correspond one to one with what the
//! validated path needs. Every mismatch is reported against the offending reference index
//! or item.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    builder::CertPath,
    cert::Certificate,
    crl::Crl,
    digest::DigestAlgorithm,
    evidence::RevocationEvidenceIndex,
    ocsp::{CertId, OcspResponse, ResponderId},
    policy::{CertificateReferenceRequirement, SignaturePolicy},
    requirement::{self, ChainRole, ConfigurationError, RevocationRequirement},
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MismatchError {
    #[error("unknown digest algorithm {oid}")]
    UnknownDigestAlgorithm { oid: String },
    #[error("reference #{index} is duplicated")]
    DuplicatedReference { index: usize },
    #[error("certificate reference #{index} matches no certificate")]
    MissingCertificate { index: usize },
    #[error("reference #{index} matches {count} items")]
    AmbiguousReference { index: usize, count: usize },
    #[error("reference #{index} points at the same item as reference #{first}")]
    RepeatedItem { index: usize, first: usize },
    #[error("certificate {subject} is not referenced")]
    UnreferencedCertificate { subject: String },
    #[error("signature policy has no trust point for {issuer}")]
    NoTrustPoint { issuer: String },
    #[error("CRL reference #{index} matches no CRL")]
    MissingCrl { index: usize },
    #[error("CRL of {issuer} is not referenced")]
    UnreferencedCrl { issuer: String },
    #[error("OCSP reference #{index} matches no response")]
    MissingOcspResponse { index: usize },
    #[error("OCSP response produced at {produced_at} is not referenced")]
    UnreferencedOcspResponse { produced_at: OffsetDateTime },
    #[error("{kind} references are required but none are present")]
    MissingRevocationReferences { kind: EvidenceKind },
    #[error("no {kind} evidence for {subject}")]
    MissingEvidence { subject: String, kind: EvidenceKind },
    #[error("{kind}: {matched} reference(s) matched out of {total}")]
    WrongCount {
        kind: EvidenceKind,
        matched: usize,
        total: usize,
    },
    #[error("revocation evidence could not be fetched: {message}")]
    EvidenceUnavailable { message: String },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    Crl,
    Ocsp,
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceKind::Crl => f.write_str("CRL"),
            EvidenceKind::Ocsp => f.write_str("OCSP"),
        }
    }
}

/// Digest of a referenced object, with the algorithm carried by the reference itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashReference {
    pub algorithm: DigestAlgorithm,
    #[serde(with = "hex_bytes")]
    pub digest: Vec<u8>,
}

impl HashReference {
    pub fn new(algorithm: DigestAlgorithm, digest: Vec<u8>) -> Self {
        Self { algorithm, digest }
    }

    /// Reference to `encoded` under `algorithm`.
    pub fn of(algorithm: DigestAlgorithm, encoded: &[u8]) -> Self {
        Self::new(algorithm, algorithm.digest(encoded))
    }

    /// Full-length comparison of the digest of `encoded`.
    pub fn matches(&self, encoded: &[u8]) -> bool {
        self.algorithm.digest(encoded) == self.digest
    }
}

/// `OtherHash` as encoded in signatures: a bare SHA-1 value or an explicit algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtherHash {
    Sha1(Vec<u8>),
    AlgAndValue { algorithm_oid: String, value: Vec<u8> },
}

impl TryFrom<OtherHash> for HashReference {
    type Error = MismatchError;

    fn try_from(hash: OtherHash) -> Result<Self, Self::Error> {
        match hash {
            OtherHash::Sha1(value) => Ok(HashReference::new(DigestAlgorithm::Sha1, value)),
            OtherHash::AlgAndValue {
                algorithm_oid,
                value,
            } => match DigestAlgorithm::from_oid(&algorithm_oid) {
                Some(algorithm) => Ok(HashReference::new(algorithm, value)),
                None => Err(MismatchError::UnknownDigestAlgorithm { oid: algorithm_oid }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssuerSerial {
    #[serde(with = "hex_bytes")]
    pub issuer: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub serial: Vec<u8>,
}

impl IssuerSerial {
    pub fn of(cert: &Certificate) -> Self {
        Self {
            issuer: cert.issuer_raw().to_vec(),
            serial: cert.serial().to_vec(),
        }
    }
}

/// `OtherCertID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateReference {
    pub hash: HashReference,
    pub issuer_serial: Option<IssuerSerial>,
}

impl CertificateReference {
    pub fn for_certificate(cert: &Certificate, algorithm: DigestAlgorithm) -> Self {
        Self {
            hash: HashReference::of(algorithm, cert.der()),
            issuer_serial: Some(IssuerSerial::of(cert)),
        }
    }

    pub fn matches(&self, cert: &Certificate) -> bool {
        self.hash.matches(cert.der())
    }
}

/// `CrlValidatedID`: the hash plus optional identifying fields that must agree when given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CrlReference {
    pub hash: HashReference,
    pub issuer: Option<Vec<u8>>,
    pub issued_time: Option<OffsetDateTime>,
    pub crl_number: Option<String>,
}

impl CrlReference {
    pub fn for_crl(crl: &Crl, algorithm: DigestAlgorithm) -> Self {
        Self {
            hash: HashReference::of(algorithm, crl.der()),
            issuer: Some(crl.issuer_raw().to_vec()),
            issued_time: Some(crl.this_update()),
            crl_number: crl.crl_number().map(str::to_string),
        }
    }

    pub fn matches(&self, crl: &Crl) -> bool {
        self.hash.matches(crl.der())
            && self.issuer.as_deref().map_or(true, |i| i == crl.issuer_raw())
            && self.issued_time.map_or(true, |t| t == crl.this_update())
            && self
                .crl_number
                .as_deref()
                .map_or(true, |n| Some(n) == crl.crl_number())
    }
}

/// `OcspResponsesID`. Without a hash the responder and production time identify the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OcspReference {
    pub responder_id: ResponderId,
    pub produced_at: OffsetDateTime,
    pub hash: Option<HashReference>,
}

impl OcspReference {
    pub fn for_response(response: &OcspResponse, algorithm: DigestAlgorithm) -> Self {
        Self {
            responder_id: response.responder_id.clone(),
            produced_at: response.produced_at,
            hash: Some(HashReference::of(algorithm, &response.encoded)),
        }
    }

    pub fn matches(&self, response: &OcspResponse) -> bool {
        match &self.hash {
            Some(hash) => hash.matches(&response.encoded),
            None => {
                self.responder_id == response.responder_id
                    && self.produced_at == response.produced_at
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationReferences {
    pub crls: Vec<CrlReference>,
    pub ocsp: Vec<OcspReference>,
}

impl RevocationReferences {
    pub fn is_empty(&self) -> bool {
        self.crls.is_empty() && self.ocsp.is_empty()
    }
}

fn reject_duplicates<T: Eq + std::hash::Hash>(refs: &[T]) -> Result<(), MismatchError> {
    let mut seen = HashSet::new();
    for (index, reference) in refs.iter().enumerate() {
        if !seen.insert(reference) {
            return Err(MismatchError::DuplicatedReference { index });
        }
    }
    Ok(())
}

/// Index of the single item each reference matches. No two references may share an item.
fn match_each<R, I>(
    refs: &[R],
    items: &[I],
    matches: impl Fn(&R, &I) -> bool,
    missing: impl Fn(usize) -> MismatchError,
) -> Result<Vec<usize>, MismatchError> {
    let mut claimed: Vec<usize> = Vec::with_capacity(refs.len());
    for (index, reference) in refs.iter().enumerate() {
        let mut hits = items
            .iter()
            .enumerate()
            .filter(|(_, item)| matches(reference, *item))
            .map(|(i, _)| i);
        let Some(hit) = hits.next() else {
            return Err(missing(index));
        };
        let extra = hits.count();
        if extra > 0 {
            return Err(MismatchError::AmbiguousReference {
                index,
                count: extra + 1,
            });
        }
        if let Some(first) = claimed.iter().position(|&i| i == hit) {
            warn!("✗ references #{first} and #{index} resolve to the same item");
            return Err(MismatchError::RepeatedItem { index, first });
        }
        claimed.push(hit);
    }
    Ok(claimed)
}

fn dedup<T: PartialEq + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Match certificate references against the CA certificates of `path` and its anchor.
///
/// The end-entity certificate is never part of the comparison set.
pub fn match_certificate_refs(
    refs: &[CertificateReference],
    path: &CertPath,
    requirement: CertificateReferenceRequirement,
) -> Result<(), MismatchError> {
    match_path_refs(refs, path, path.anchor().certificate(), requirement)
}

/// Like [`match_certificate_refs`], with the anchor and the completeness rule taken from
/// `policy`. The anchor is the policy's trust point for the issuer of the last certificate.
pub fn match_certificate_refs_with_policy(
    refs: &[CertificateReference],
    path: &CertPath,
    policy: &dyn SignaturePolicy,
) -> Result<(), MismatchError> {
    let last = &path.certificates()[path.len() - 1];
    let Some(trust_point) = policy.trust_point_for(last.issuer_raw()) else {
        warn!("✗ no trust point for {}", last.issuer_name());
        return Err(MismatchError::NoTrustPoint {
            issuer: last.issuer_name().to_string(),
        });
    };
    match_path_refs(
        refs,
        path,
        trust_point.certificate(),
        policy.certificate_reference_requirement(),
    )
}

fn match_path_refs(
    refs: &[CertificateReference],
    path: &CertPath,
    anchor: &Certificate,
    requirement: CertificateReferenceRequirement,
) -> Result<(), MismatchError> {
    reject_duplicates(refs)?;
    let items = dedup(
        path.ca_certificates()
            .iter()
            .chain(std::iter::once(anchor))
            .filter(|c| *c != path.end_entity())
            .cloned(),
    );
    let matched = match_each(refs, &items, CertificateReference::matches, |index| {
        MismatchError::MissingCertificate { index }
    })?;
    if requirement == CertificateReferenceRequirement::FullPath {
        for (i, cert) in items.iter().enumerate() {
            if !matched.contains(&i) {
                warn!("✗ certificate {} is not referenced", cert.subject_name());
                return Err(MismatchError::UnreferencedCertificate {
                    subject: cert.subject_name().to_string(),
                });
            }
        }
    }
    debug!("✓ {} certificate reference(s) matched", refs.len());
    Ok(())
}

/// Match certificate references against certificate values.
///
/// Only `signer` may appear among the values without a reference.
pub fn match_certificate_values(
    refs: &[CertificateReference],
    values: &[Certificate],
    signer: &Certificate,
) -> Result<(), MismatchError> {
    reject_duplicates(refs)?;
    let values = dedup(values.iter().cloned());
    let matched = match_each(refs, &values, CertificateReference::matches, |index| {
        MismatchError::MissingCertificate { index }
    })?;
    for (i, cert) in values.iter().enumerate() {
        if cert != signer && !matched.contains(&i) {
            warn!("✗ certificate value {} is not referenced", cert.subject_name());
            return Err(MismatchError::UnreferencedCertificate {
                subject: cert.subject_name().to_string(),
            });
        }
    }
    debug!("✓ {} certificate value(s) matched", values.len());
    Ok(())
}

/// Evidence the revocation requirement demands for `path`.
#[derive(Debug, Default)]
struct ExpectedEvidence {
    crls: Vec<Crl>,
    responses: Vec<OcspResponse>,
    needs_crl: bool,
    needs_ocsp: bool,
}

fn expected_evidence(
    path: &CertPath,
    requirement: &RevocationRequirement,
    index: &RevocationEvidenceIndex,
    at: OffsetDateTime,
) -> Result<ExpectedEvidence, MismatchError> {
    let strategy = requirement::resolve(requirement)?;
    let mut expected = ExpectedEvidence {
        needs_crl: strategy.requires_crl(),
        needs_ocsp: strategy.requires_ocsp(),
        ..Default::default()
    };
    for (position, (subject, issuer)) in path.pairs().enumerate() {
        if subject == issuer {
            continue;
        }
        let role = if position == 0 {
            ChainRole::EndEntity
        } else {
            ChainRole::Ca
        };
        let method = strategy.for_role(role);
        if method.uses_crl() {
            let crl = find_crl(index, subject, at)?.ok_or_else(|| MismatchError::MissingEvidence {
                subject: subject.subject_name().to_string(),
                kind: EvidenceKind::Crl,
            })?;
            if !expected.crls.contains(&crl) {
                expected.crls.push(crl);
            }
        }
        if method.uses_ocsp() {
            let cert_id = CertId::new(subject, issuer);
            let response =
                index
                    .ocsp_response_for(&cert_id)
                    .ok_or_else(|| MismatchError::MissingEvidence {
                        subject: subject.subject_name().to_string(),
                        kind: EvidenceKind::Ocsp,
                    })?;
            if !expected.responses.contains(&response) {
                expected.responses.push(response);
            }
        }
    }
    Ok(expected)
}

/// CRL at `at`, otherwise any CRL of the issuer.
fn find_crl(
    index: &RevocationEvidenceIndex,
    cert: &Certificate,
    at: OffsetDateTime,
) -> Result<Option<Crl>, MismatchError> {
    let unavailable = |e: anyhow::Error| MismatchError::EvidenceUnavailable {
        message: format!("{e:#}"),
    };
    if let Some(crl) = index.crl_for(cert, Some(at)).map_err(unavailable)? {
        return Ok(Some(crl));
    }
    let crl = index.crl_for(cert, None).map_err(unavailable)?;
    if crl.is_some() {
        debug!(
            "CRL reference check for {} falls back to a CRL outside its window",
            cert.subject_name()
        );
    }
    Ok(crl)
}

/// Every expected item is referenced and every reference hits an expected item.
fn cover_expected<R, I>(
    kind: EvidenceKind,
    refs: &[R],
    expected: &[I],
    matches: impl Fn(&R, &I) -> bool,
    unreferenced: impl Fn(&I) -> MismatchError,
) -> Result<(), MismatchError> {
    if refs.is_empty() {
        return Err(MismatchError::MissingRevocationReferences { kind });
    }
    let mut matched_refs = HashSet::new();
    for item in expected {
        let hits: Vec<usize> = refs
            .iter()
            .enumerate()
            .filter(|(_, r)| matches(*r, item))
            .map(|(i, _)| i)
            .collect();
        if hits.is_empty() {
            return Err(unreferenced(item));
        }
        matched_refs.extend(hits);
    }
    // Every expected item is hit, so the distinct item count is expected.len().
    if expected.len() != refs.len() || matched_refs.len() != refs.len() {
        warn!(
            "✗ {kind}: {} item(s) referenced by {} reference(s)",
            expected.len(),
            refs.len()
        );
        return Err(MismatchError::WrongCount {
            kind,
            matched: expected.len(),
            total: refs.len(),
        });
    }
    Ok(())
}

/// Match revocation references against the evidence the requirement calls for.
///
/// The requirement is resolved with the same strategy matrix used during validation. CRL
/// lookups fall back to ignoring the update window for end-entity and CA positions alike.
pub fn match_revocation_refs(
    refs: &RevocationReferences,
    path: &CertPath,
    requirement: &RevocationRequirement,
    index: &RevocationEvidenceIndex,
    at: OffsetDateTime,
) -> Result<(), MismatchError> {
    reject_duplicates(&refs.crls)?;
    reject_duplicates(&refs.ocsp)?;
    let expected = expected_evidence(path, requirement, index, at)?;
    if expected.needs_crl {
        cover_expected(
            EvidenceKind::Crl,
            &refs.crls,
            &expected.crls,
            CrlReference::matches,
            |crl: &Crl| MismatchError::UnreferencedCrl {
                issuer: crl.issuer_name().to_string(),
            },
        )?;
    }
    if expected.needs_ocsp {
        cover_expected(
            EvidenceKind::Ocsp,
            &refs.ocsp,
            &expected.responses,
            OcspReference::matches,
            |response: &OcspResponse| MismatchError::UnreferencedOcspResponse {
                produced_at: response.produced_at,
            },
        )?;
    }
    debug!(
        "✓ revocation references matched: {} CRL, {} OCSP",
        refs.crls.len(),
        refs.ocsp.len()
    );
    Ok(())
}

/// Revocation values must correspond one to one with the references.
pub fn match_revocation_values(
    refs: &RevocationReferences,
    crls: &[Crl],
    responses: &[OcspResponse],
) -> Result<(), MismatchError> {
    reject_duplicates(&refs.crls)?;
    reject_duplicates(&refs.ocsp)?;
    let crls = dedup(crls.iter().cloned());
    let responses = dedup(responses.iter().cloned());

    let matched = match_each(&refs.crls, &crls, CrlReference::matches, |index| {
        MismatchError::MissingCrl { index }
    })?;
    if let Some(crl) = crls
        .iter()
        .enumerate()
        .find(|(i, _)| !matched.contains(i))
        .map(|(_, crl)| crl)
    {
        return Err(MismatchError::UnreferencedCrl {
            issuer: crl.issuer_name().to_string(),
        });
    }

    let matched = match_each(&refs.ocsp, &responses, OcspReference::matches, |index| {
        MismatchError::MissingOcspResponse { index }
    })?;
    if let Some(response) = responses
        .iter()
        .enumerate()
        .find(|(i, _)| !matched.contains(i))
        .map(|(_, r)| r)
    {
        return Err(MismatchError::UnreferencedOcspResponse {
            produced_at: response.produced_at,
        });
    }
    debug!(
        "✓ revocation values matched: {} CRL(s), {} OCSP response(s)",
        crls.len(),
        responses.len()
    );
    Ok(())
}
