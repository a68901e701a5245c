// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Decoded OCSP responses.
//!
//! Responses arrive already decoded from the signature container; this module only keeps
//! what status lookup, responder binding and hash references need.

use ring::signature::{
    UnparsedPublicKey, VerificationAlgorithm, ECDSA_P256_SHA256_ASN1, ECDSA_P384_SHA384_ASN1,
    RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_2048_8192_SHA384,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    cert::{Certificate, SignatureError},
    digest::DigestAlgorithm,
};

/// Identifies a certificate inside an OCSP response (RFC 6960 CertID, SHA-1 flavour).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertId {
    pub issuer_name_hash: Vec<u8>,
    pub issuer_key_hash: Vec<u8>,
    pub serial_number: Vec<u8>,
}

impl CertId {
    pub fn new(cert: &Certificate, issuer: &Certificate) -> Self {
        Self {
            issuer_name_hash: DigestAlgorithm::Sha1.digest(cert.issuer_raw()),
            issuer_key_hash: DigestAlgorithm::Sha1.digest(issuer.public_key_bits()),
            serial_number: cert.serial().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponderId {
    /// DER encoded responder name.
    ByName(Vec<u8>),
    /// SHA-1 of the responder's public key bits.
    ByKeyHash(Vec<u8>),
}

impl ResponderId {
    pub fn matches(&self, responder: &Certificate) -> bool {
        match self {
            ResponderId::ByName(name) => name == responder.subject_raw(),
            ResponderId::ByKeyHash(hash) => {
                *hash == DigestAlgorithm::Sha1.digest(responder.public_key_bits())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspCertStatus {
    Good,
    Revoked { revocation_time: OffsetDateTime },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub status: OcspCertStatus,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspSignatureAlgorithm {
    EcdsaP256Sha256,
    EcdsaP384Sha384,
    RsaPkcs1Sha256,
    RsaPkcs1Sha384,
}

impl OcspSignatureAlgorithm {
    fn ring_algorithm(self) -> &'static dyn VerificationAlgorithm {
        match self {
            OcspSignatureAlgorithm::EcdsaP256Sha256 => &ECDSA_P256_SHA256_ASN1,
            OcspSignatureAlgorithm::EcdsaP384Sha384 => &ECDSA_P384_SHA384_ASN1,
            OcspSignatureAlgorithm::RsaPkcs1Sha256 => &RSA_PKCS1_2048_8192_SHA256,
            OcspSignatureAlgorithm::RsaPkcs1Sha384 => &RSA_PKCS1_2048_8192_SHA384,
        }
    }
}

/// A BasicOCSPResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspResponse {
    pub responder_id: ResponderId,
    pub produced_at: OffsetDateTime,
    pub responses: Vec<SingleResponse>,
    /// DER of ResponseData, the signed part.
    pub tbs_response_data: Vec<u8>,
    pub signature_algorithm: OcspSignatureAlgorithm,
    pub signature: Vec<u8>,
    /// Complete BasicOCSPResponse encoding; hash references are computed over it.
    pub encoded: Vec<u8>,
}

impl OcspResponse {
    pub fn single_response(&self, cert_id: &CertId) -> Option<&SingleResponse> {
        self.responses.iter().find(|r| &r.cert_id == cert_id)
    }

    pub fn covers(&self, cert_id: &CertId) -> bool {
        self.single_response(cert_id).is_some()
    }

    pub fn verify_signed_by(&self, responder: &Certificate) -> Result<(), SignatureError> {
        let key = UnparsedPublicKey::new(
            self.signature_algorithm.ring_algorithm(),
            responder.public_key_bits(),
        );
        key.verify(&self.tbs_response_data, &self.signature)
            .map_err(|_| SignatureError::Invalid)
    }

    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(&self.encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_id_by_key_hash() {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let params = rcgen::CertificateParams::new(vec!["ocsp.example.com".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        let responder = Certificate::from_der(cert.der()).unwrap();

        let by_key =
            ResponderId::ByKeyHash(DigestAlgorithm::Sha1.digest(responder.public_key_bits()));
        assert!(by_key.matches(&responder));
        let by_name = ResponderId::ByName(responder.subject_raw().to_vec());
        assert!(by_name.matches(&responder));
        assert!(!ResponderId::ByKeyHash(vec![0; 20]).matches(&responder));
    }
}
