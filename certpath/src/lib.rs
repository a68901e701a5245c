// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Certificate path building and revocation validation.
//!
//! This crate verifies that a signer certificate chains to a trusted root and that its
//! revocation status is proven the way a signature policy demands.
//!
//! # Architecture
//! - **Step 1**: [`ChainBuilder::build`] - construct a path to a self-signed anchor
//! - **Step 2**: [`requirement::resolve`] - turn the policy requirement into one of nine strategies
//! - **Step 3**: [`ChainValidator::validate`] - check signatures, validity and revocation
//! - **Step 4**: [`references`] - match reference and value attributes against the evidence
//!
//! CRLs and OCSP responses are never fetched by the validator directly; they come from
//! [`RevocationInformation`] collaborators through the shared [`RevocationEvidenceIndex`].

pub mod builder;
pub mod cert;
pub mod config;
pub mod crl;
pub mod digest;
pub mod evidence;
pub mod ocsp;
pub mod policy;
pub mod pool;
pub mod references;
pub mod report;
pub mod requirement;
pub mod revocation;
pub mod service;
pub mod trust;
pub mod validator;

pub use builder::{CertPath, ChainBuilder, PathError};
pub use cert::{Certificate, SignatureError};
pub use config::ValidationConfig;
pub use crl::Crl;
pub use digest::DigestAlgorithm;
pub use evidence::{CrlCollection, CrlResult, RevocationEvidenceIndex, RevocationInformation};
pub use ocsp::{CertId, OcspCertStatus, OcspResponse};
pub use policy::{
    CertificateReferenceRequirement, PolicyRole, SignaturePolicy, StaticSignaturePolicy,
};
pub use pool::{AiaError, AiaFetcher, CertificatePool, InMemoryCertificatePool};
pub use references::MismatchError;
pub use report::ValidationReport;
pub use requirement::{
    ConfigurationError, RevocationMethod, RevocationRequirement, Strategy,
};
pub use revocation::{RevocationCheck, RevocationFailure};
pub use service::{CertificateValidationService, ValidationResult};
pub use trust::{TrustAnchor, TrustAnchorStore};
pub use validator::{ChainValidator, InvalidReason, ValidationOutcome};

#[cfg(feature = "aia-download")]
pub use pool::HttpAiaFetcher;
