// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Validation data report.

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    builder::CertPath,
    cert::Certificate,
    crl::Crl,
    evidence::RevocationEvidenceIndex,
    pool::CertificatePool,
    trust::TrustAnchorStore,
    validator::{OutcomeSummary, ValidationOutcome},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateRecord {
    pub issuer_name: String,
    pub subject_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    pub serial_number: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub crl_distribution_points: Vec<String>,
    pub was_online: bool,
}

impl CertificateRecord {
    pub fn new(cert: &Certificate, was_online: bool) -> Self {
        Self {
            issuer_name: cert.issuer_name().to_string(),
            subject_name: cert.subject_name().to_string(),
            not_before: cert.not_before(),
            not_after: cert.not_after(),
            serial_number: cert.serial_hex(),
            crl_distribution_points: cert.crl_distribution_points().to_vec(),
            was_online,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrlRecord {
    pub issuer_name: String,
    pub crl_number: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub this_update: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_update: Option<OffsetDateTime>,
    pub was_online: bool,
    pub signature_valid: bool,
}

impl CrlRecord {
    /// `issuers` are searched for a certificate whose key verifies the CRL.
    pub fn new<'a>(
        crl: &Crl,
        was_online: bool,
        issuers: impl IntoIterator<Item = &'a Certificate>,
    ) -> Self {
        let signature_valid = issuers
            .into_iter()
            .filter(|issuer| crl.is_issued_by(issuer))
            .any(|issuer| crl.verify_signed_by(issuer).is_ok());
        Self {
            issuer_name: crl.issuer_name().to_string(),
            crl_number: crl.crl_number().map(str::to_string),
            this_update: crl.this_update(),
            next_update: crl.next_update(),
            was_online,
            signature_valid,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    #[serde(with = "time::serde::rfc3339")]
    pub reference_time: OffsetDateTime,
    pub outcome: OutcomeSummary,
    pub certificates: Vec<CertificateRecord>,
    pub crls: Vec<CrlRecord>,
}

impl ValidationReport {
    /// Records for every path certificate, the anchor, and every CRL the index holds.
    pub fn new(
        path: Option<&CertPath>,
        outcome: &ValidationOutcome,
        pool: &dyn CertificatePool,
        evidence: &RevocationEvidenceIndex,
        anchors: &TrustAnchorStore,
        reference_time: OffsetDateTime,
    ) -> Self {
        let mut certificates = Vec::new();
        let mut issuers: Vec<&Certificate> = anchors.iter().map(|a| a.certificate()).collect();
        if let Some(path) = path {
            for cert in path.certificates() {
                certificates.push(CertificateRecord::new(cert, pool.was_fetched_online(cert)));
            }
            let anchor = path.anchor().certificate();
            if !path.certificates().contains(anchor) {
                certificates.push(CertificateRecord::new(anchor, false));
            }
            issuers.extend(path.certificates());
        }
        let crls = evidence
            .all_crls()
            .iter()
            .map(|result| CrlRecord::new(&result.crl, result.from_network, issuers.iter().copied()))
            .collect();
        Self {
            reference_time,
            outcome: outcome.summary(),
            certificates,
            crls,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize validation report")
    }
}
