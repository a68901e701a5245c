// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Signature policy queries used during validation.

use serde::{Deserialize, Serialize};

use crate::{requirement::RevocationRequirement, trust::TrustAnchor, trust::TrustAnchorStore};

/// Which party's revocation rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyRole {
    Signer,
    Verifier,
}

/// How much of the path the certificate references must cover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CertificateReferenceRequirement {
    SignerOnly,
    #[default]
    FullPath,
}

pub trait SignaturePolicy: Send + Sync {
    fn revocation_requirement_for(&self, role: PolicyRole) -> RevocationRequirement;

    /// Trust point for a path whose last certificate names `issuer`.
    fn trust_point_for(&self, issuer: &[u8]) -> Option<TrustAnchor>;

    fn certificate_reference_requirement(&self) -> CertificateReferenceRequirement;
}

/// A policy fixed at construction time, typically from [`crate::config::ValidationConfig`].
#[derive(Debug, Clone, Default)]
pub struct StaticSignaturePolicy {
    pub signer: RevocationRequirement,
    pub verifier: RevocationRequirement,
    pub references: CertificateReferenceRequirement,
    pub anchors: TrustAnchorStore,
}

impl StaticSignaturePolicy {
    pub fn new(anchors: TrustAnchorStore, requirement: RevocationRequirement) -> Self {
        Self {
            signer: requirement,
            verifier: requirement,
            references: CertificateReferenceRequirement::default(),
            anchors,
        }
    }

    pub fn with_references(mut self, references: CertificateReferenceRequirement) -> Self {
        self.references = references;
        self
    }
}

impl SignaturePolicy for StaticSignaturePolicy {
    fn revocation_requirement_for(&self, role: PolicyRole) -> RevocationRequirement {
        match role {
            PolicyRole::Signer => self.signer,
            PolicyRole::Verifier => self.verifier,
        }
    }

    fn trust_point_for(&self, issuer: &[u8]) -> Option<TrustAnchor> {
        self.anchors
            .roots_for_issuer(issuer)
            .next()
            .or_else(|| self.anchors.anchors_for_issuer(issuer).next())
            .cloned()
    }

    fn certificate_reference_requirement(&self) -> CertificateReferenceRequirement {
        self.references
    }
}
