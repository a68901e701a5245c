// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Trust anchors.

use anyhow::Result;
use tracing::{debug, warn};

use crate::cert::Certificate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustAnchor {
    certificate: Certificate,
    self_signed_root: bool,
}

impl TrustAnchor {
    pub fn new(certificate: Certificate) -> Self {
        let self_signed_root = certificate.is_self_signed();
        Self {
            certificate,
            self_signed_root,
        }
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// Only self-signed roots terminate a built path.
    pub fn is_self_signed_root(&self) -> bool {
        self.self_signed_root
    }

    pub fn subject_raw(&self) -> &[u8] {
        self.certificate.subject_raw()
    }
}

/// The configured set of trusted certificates.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorStore {
    anchors: Vec<TrustAnchor>,
}

impl TrustAnchorStore {
    pub fn new(certs: impl IntoIterator<Item = Certificate>) -> Self {
        let mut store = Self::default();
        for cert in certs {
            store.add(cert);
        }
        store
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Ok(Self::new(Certificate::from_pem_bundle(pem)?))
    }

    pub fn add(&mut self, cert: Certificate) {
        if self.anchors.iter().any(|a| a.certificate == cert) {
            return;
        }
        let anchor = TrustAnchor::new(cert);
        if anchor.is_self_signed_root() {
            debug!(
                "trust anchor added: subject={}",
                anchor.certificate.subject_name()
            );
        } else {
            warn!(
                "trust anchor {} is not a self-signed root, it will not terminate built paths",
                anchor.certificate.subject_name()
            );
        }
        self.anchors.push(anchor);
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.iter()
    }

    pub fn self_signed_roots(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.iter().filter(|a| a.is_self_signed_root())
    }

    /// Self-signed roots whose subject is `issuer`.
    pub fn roots_for_issuer<'a>(
        &'a self,
        issuer: &'a [u8],
    ) -> impl Iterator<Item = &'a TrustAnchor> + 'a {
        self.self_signed_roots()
            .filter(move |a| a.subject_raw() == issuer)
    }

    /// Any anchor whose subject is `issuer`.
    pub fn anchors_for_issuer<'a>(
        &'a self,
        issuer: &'a [u8],
    ) -> impl Iterator<Item = &'a TrustAnchor> + 'a {
        self.anchors.iter().filter(move |a| a.subject_raw() == issuer)
    }

    pub fn contains(&self, cert: &Certificate) -> bool {
        self.anchors.iter().any(|a| &a.certificate == cert)
    }
}
