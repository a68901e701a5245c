// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Revocation evidence cache.
//!
//! CRLs are cached per issuer name and filtered by their update window on read, so one
//! entry serves every reference time. The cache only grows: concurrent population of the
//! same issuer may fetch twice, but inserts are deduplicated by fingerprint so readers
//! never observe inconsistent state.
//!
//! OCSP responses are bound to a responder certificate when added; only responses whose
//! signature verifies under that certificate contribute statuses.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, PoisonError, RwLock,
};

use anyhow::Result;
use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::{
    cert::Certificate,
    crl::Crl,
    digest::DigestAlgorithm,
    ocsp::{CertId, OcspCertStatus, OcspResponse},
};

#[derive(Debug, Clone)]
pub struct CrlResult {
    pub crl: Crl,
    pub from_network: bool,
}

/// An external source of CRLs, consulted in priority order by the index.
pub trait RevocationInformation: Send + Sync {
    /// A CRL covering `cert`. `at = None` accepts any CRL regardless of its update window.
    fn crl_for(&self, cert: &Certificate, at: Option<OffsetDateTime>) -> Result<Option<CrlResult>>;
}

/// A fixed list of CRLs, e.g. those embedded in a signature or loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct CrlCollection {
    crls: Vec<Crl>,
    from_network: bool,
}

impl CrlCollection {
    pub fn new(crls: Vec<Crl>) -> Self {
        Self {
            crls,
            from_network: false,
        }
    }

    /// Mark everything this collection returns as network-sourced.
    pub fn online(mut self) -> Self {
        self.from_network = true;
        self
    }
}

impl RevocationInformation for CrlCollection {
    fn crl_for(&self, cert: &Certificate, at: Option<OffsetDateTime>) -> Result<Option<CrlResult>> {
        let found = self
            .crls
            .iter()
            .filter(|crl| crl.covers(cert))
            .find(|crl| at.map_or(true, |at| crl.is_valid_at(at)));
        Ok(found.map(|crl| CrlResult {
            crl: crl.clone(),
            from_network: self.from_network,
        }))
    }
}

#[derive(Debug, Clone)]
struct CachedCrl {
    crl: Crl,
    fingerprint: Vec<u8>,
    from_network: bool,
}

#[derive(Debug, Clone)]
struct OcspEntry {
    status: OcspCertStatus,
    response: usize,
}

#[derive(Default)]
pub struct RevocationEvidenceIndex {
    sources: Vec<Arc<dyn RevocationInformation>>,
    crls: DashMap<Vec<u8>, Vec<CachedCrl>>,
    ocsp_received: AtomicUsize,
    ocsp_responses: RwLock<Vec<OcspResponse>>,
    ocsp_statuses: DashMap<CertId, OcspEntry>,
}

impl RevocationEvidenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a collaborator; earlier sources win.
    pub fn with_source(mut self, source: Arc<dyn RevocationInformation>) -> Self {
        self.sources.push(source);
        self
    }

    /// Cache a CRL. Returns false when it was already present.
    pub fn add_crl(&self, crl: Crl, from_network: bool) -> bool {
        let fingerprint = crl.digest(DigestAlgorithm::Sha256);
        let mut entry = self.crls.entry(crl.issuer_raw().to_vec()).or_default();
        if entry.iter().any(|c| c.fingerprint == fingerprint) {
            return false;
        }
        debug!(
            "cached CRL: issuer={}, crl_number={:?}, online={from_network}",
            crl.issuer_name(),
            crl.crl_number()
        );
        entry.push(CachedCrl {
            crl,
            fingerprint,
            from_network,
        });
        true
    }

    fn has_crl_for(&self, issuer: &[u8], at: Option<OffsetDateTime>) -> bool {
        self.crls.get(issuer).is_some_and(|cached| {
            cached
                .iter()
                .any(|c| at.map_or(true, |at| c.crl.is_valid_at(at)))
        })
    }

    /// Ask the collaborators for a CRL covering `cert`, stopping at the first answer.
    ///
    /// Nothing is fetched when the cache already holds a usable CRL for the issuer.
    /// Collaborator errors are returned unchanged.
    pub fn populate_for(&self, cert: &Certificate, at: Option<OffsetDateTime>) -> Result<()> {
        if self.has_crl_for(cert.issuer_raw(), at) {
            return Ok(());
        }
        for (i, source) in self.sources.iter().enumerate() {
            let Some(result) = source.crl_for(cert, at)? else {
                continue;
            };
            debug!(
                "revocation source #{i} provided a CRL for {}",
                cert.subject_name()
            );
            self.add_crl(result.crl, result.from_network);
            return Ok(());
        }
        debug!("no revocation source has a CRL for {}", cert.subject_name());
        Ok(())
    }

    /// Cached CRLs of `issuer`; `at = None` ignores the update window.
    pub fn crls(&self, issuer: &[u8], at: Option<OffsetDateTime>) -> Vec<Crl> {
        let Some(cached) = self.crls.get(issuer) else {
            return Vec::new();
        };
        cached
            .iter()
            .filter(|c| at.map_or(true, |at| c.crl.is_valid_at(at)))
            .map(|c| c.crl.clone())
            .collect()
    }

    /// The most recent CRL of `cert`'s issuer usable at `at`, fetching if needed.
    pub fn crl_for(&self, cert: &Certificate, at: Option<OffsetDateTime>) -> Result<Option<Crl>> {
        self.populate_for(cert, at)?;
        Ok(self
            .crls(cert.issuer_raw(), at)
            .into_iter()
            .max_by_key(|crl| crl.this_update()))
    }

    pub fn was_online(&self, crl: &Crl) -> bool {
        self.crls
            .get(crl.issuer_raw())
            .is_some_and(|cached| cached.iter().any(|c| &c.crl == crl && c.from_network))
    }

    /// Every cached CRL with its provenance, ordered by issuer and thisUpdate.
    pub fn all_crls(&self) -> Vec<CrlResult> {
        let mut all: Vec<CrlResult> = self
            .crls
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|c| CrlResult {
                        crl: c.crl.clone(),
                        from_network: c.from_network,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        all.sort_by(|a, b| {
            a.crl
                .issuer_raw()
                .cmp(b.crl.issuer_raw())
                .then(a.crl.this_update().cmp(&b.crl.this_update()))
        });
        all
    }

    /// Index OCSP responses signed by `responder`. Returns how many were accepted.
    pub fn add_ocsp_responses(
        &self,
        responses: impl IntoIterator<Item = OcspResponse>,
        responder: Option<&Certificate>,
    ) -> usize {
        let mut accepted = 0;
        for response in responses {
            self.ocsp_received.fetch_add(1, Ordering::SeqCst);
            let Some(responder) = responder else {
                warn!("OCSP response without responder certificate ignored");
                continue;
            };
            if !response.responder_id.matches(responder) {
                warn!(
                    "OCSP responder id does not match {}",
                    responder.subject_name()
                );
                continue;
            }
            if let Err(e) = response.verify_signed_by(responder) {
                warn!("✗ OCSP response signature verification failed: {e}");
                continue;
            }
            let mut stored = self
                .ocsp_responses
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let index = stored.len();
            for single in &response.responses {
                self.ocsp_statuses
                    .entry(single.cert_id.clone())
                    .or_insert(OcspEntry {
                        status: single.status,
                        response: index,
                    });
            }
            stored.push(response);
            accepted += 1;
        }
        debug!("✓ {accepted} OCSP response(s) bound to responder");
        accepted
    }

    /// Whether any OCSP response was supplied, verified or not.
    pub fn has_ocsp_responses(&self) -> bool {
        self.ocsp_received.load(Ordering::SeqCst) > 0
    }

    pub fn ocsp_status(&self, cert_id: &CertId) -> Option<OcspCertStatus> {
        self.ocsp_statuses.get(cert_id).map(|e| e.status)
    }

    pub fn ocsp_response_for(&self, cert_id: &CertId) -> Option<OcspResponse> {
        let index = self.ocsp_statuses.get(cert_id)?.response;
        self.ocsp_responses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }
}

impl std::fmt::Debug for RevocationEvidenceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationEvidenceIndex")
            .field("sources", &self.sources.len())
            .field("crl_issuers", &self.crls.len())
            .field("ocsp_statuses", &self.ocsp_statuses.len())
            .finish()
    }
}
