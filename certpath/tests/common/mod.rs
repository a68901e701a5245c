// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Test PKI generated with rcgen.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use certpath::{
    ocsp::{OcspSignatureAlgorithm, ResponderId, SingleResponse},
    AiaError, AiaFetcher, CertId, Certificate, Crl, OcspCertStatus, OcspResponse,
};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, KeyIdMethod, KeyPair, KeyUsagePurpose, RevokedCertParams, SerialNumber,
    PKCS_ECDSA_P256_SHA256,
};
use ring::{
    rand::SystemRandom,
    signature::{EcdsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING},
};
use time::{Date, Month, OffsetDateTime};

pub fn init_tracing() {
    tracing_subscriber::fmt::try_init().ok();
}

pub fn date(year: i32, month: u8, day: u8) -> OffsetDateTime {
    Date::from_calendar_date(year, Month::try_from(month).unwrap(), day)
        .unwrap()
        .midnight()
        .assume_utc()
}

/// Reference time used by most tests.
pub fn reference_time() -> OffsetDateTime {
    date(2025, 6, 1)
}

/// A generated certificate together with what is needed to issue from it.
pub struct Issued {
    pub cert: Certificate,
    pub rc: rcgen::Certificate,
    pub key: KeyPair,
}

fn params(name: &str, serial: u64, ca: bool) -> CertificateParams {
    let mut params = CertificateParams::new(vec![]).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, name);
    params.distinguished_name.push(DnType::OrganizationName, "Certpath Test");
    params.serial_number = Some(SerialNumber::from(serial));
    params.not_before = date(2024, 1, 1);
    params.not_after = date(2030, 1, 1);
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
    }
    params
}

fn finish(rc: rcgen::Certificate, key: KeyPair) -> Issued {
    let cert = Certificate::from_der(rc.der()).unwrap();
    Issued { cert, rc, key }
}

pub fn root(name: &str, serial: u64) -> Issued {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let rc = params(name, serial, true).self_signed(&key).unwrap();
    finish(rc, key)
}

pub fn intermediate(name: &str, serial: u64, issuer: &Issued) -> Issued {
    issue(params(name, serial, true), issuer)
}

pub fn leaf(name: &str, serial: u64, issuer: &Issued) -> Issued {
    issue(params(name, serial, false), issuer)
}

pub fn leaf_valid_between(
    name: &str,
    serial: u64,
    issuer: &Issued,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Issued {
    let mut params = params(name, serial, false);
    params.not_before = not_before;
    params.not_after = not_after;
    issue(params, issuer)
}

pub fn intermediate_valid_between(
    name: &str,
    serial: u64,
    issuer: &Issued,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Issued {
    let mut params = params(name, serial, true);
    params.not_before = not_before;
    params.not_after = not_after;
    issue(params, issuer)
}

/// Certificate with an AIA caIssuers URL pointing at `url`.
pub fn leaf_with_aia(name: &str, serial: u64, issuer: &Issued, url: &str) -> Issued {
    let mut params = params(name, serial, false);
    params.custom_extensions = vec![aia_extension(url)];
    issue(params, issuer)
}

/// Certificate naming `url` as its CRL distribution point.
pub fn leaf_with_crl_dp(name: &str, serial: u64, issuer: &Issued, url: &str) -> Issued {
    let mut params = params(name, serial, false);
    params.crl_distribution_points = vec![rcgen::CrlDistributionPoint {
        uris: vec![url.to_string()],
    }];
    issue(params, issuer)
}

/// AuthorityInfoAccessSyntax with a single caIssuers URI.
fn aia_extension(url: &str) -> rcgen::CustomExtension {
    let ca_issuers_oid = [0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];
    let mut uri = vec![0x86, url.len() as u8];
    uri.extend_from_slice(url.as_bytes());
    let mut access = vec![0x30, (ca_issuers_oid.len() + uri.len()) as u8];
    access.extend_from_slice(&ca_issuers_oid);
    access.extend_from_slice(&uri);
    let mut syntax = vec![0x30, access.len() as u8];
    syntax.extend_from_slice(&access);
    rcgen::CustomExtension::from_oid_content(&[1, 3, 6, 1, 5, 5, 7, 1, 1], syntax)
}

fn issue(params: CertificateParams, issuer: &Issued) -> Issued {
    let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let rc = params.signed_by(&key, &issuer.rc, &issuer.key).unwrap();
    finish(rc, key)
}

/// CRL issued by `issuer`, revoking `(serial, revocation time)` entries.
pub fn crl(
    issuer: &Issued,
    this_update: OffsetDateTime,
    next_update: OffsetDateTime,
    revoked: &[(u64, OffsetDateTime)],
) -> Crl {
    crl_numbered(issuer, 1, this_update, next_update, revoked)
}

pub fn crl_numbered(
    issuer: &Issued,
    number: u64,
    this_update: OffsetDateTime,
    next_update: OffsetDateTime,
    revoked: &[(u64, OffsetDateTime)],
) -> Crl {
    let params = CertificateRevocationListParams {
        this_update,
        next_update,
        crl_number: SerialNumber::from(number),
        issuing_distribution_point: None,
        revoked_certs: revoked
            .iter()
            .map(|(serial, at)| RevokedCertParams {
                serial_number: SerialNumber::from(*serial),
                revocation_time: *at,
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    let crl = params.signed_by(&issuer.rc, &issuer.key).unwrap();
    Crl::from_der(crl.der().as_ref()).unwrap()
}

/// CRL for the usual test window around [`reference_time`].
pub fn current_crl(issuer: &Issued, revoked: &[(u64, OffsetDateTime)]) -> Crl {
    crl(issuer, date(2025, 5, 1), date(2025, 7, 1), revoked)
}

pub fn single_response(
    cert: &Certificate,
    issuer: &Certificate,
    status: OcspCertStatus,
) -> SingleResponse {
    SingleResponse {
        cert_id: CertId::new(cert, issuer),
        status,
        this_update: date(2025, 5, 31),
        next_update: None,
    }
}

/// OCSP response signed by `responder`, identified by name.
pub fn ocsp_response(responder: &Issued, responses: Vec<SingleResponse>) -> OcspResponse {
    let produced_at = date(2025, 5, 31);
    let mut tbs = produced_at.unix_timestamp().to_be_bytes().to_vec();
    for single in &responses {
        tbs.extend_from_slice(&single.cert_id.issuer_name_hash);
        tbs.extend_from_slice(&single.cert_id.issuer_key_hash);
        tbs.extend_from_slice(&single.cert_id.serial_number);
        tbs.push(match single.status {
            OcspCertStatus::Good => 0,
            OcspCertStatus::Revoked { .. } => 1,
            OcspCertStatus::Unknown => 2,
        });
    }
    let rng = SystemRandom::new();
    let signer = EcdsaKeyPair::from_pkcs8(
        &ECDSA_P256_SHA256_ASN1_SIGNING,
        &responder.key.serialize_der(),
        &rng,
    )
    .unwrap();
    let signature = signer.sign(&rng, &tbs).unwrap().as_ref().to_vec();
    let mut encoded = tbs.clone();
    encoded.extend_from_slice(&signature);
    OcspResponse {
        responder_id: ResponderId::ByName(responder.cert.subject_raw().to_vec()),
        produced_at,
        responses,
        tbs_response_data: tbs,
        signature_algorithm: OcspSignatureAlgorithm::EcdsaP256Sha256,
        signature,
        encoded,
    }
}

/// root -> CA -> signer.
pub struct TestChain {
    pub root: Issued,
    pub ca: Issued,
    pub leaf: Issued,
}

pub const ROOT_SERIAL: u64 = 1;
pub const CA_SERIAL: u64 = 2;
pub const LEAF_SERIAL: u64 = 3;

impl TestChain {
    pub fn new() -> Self {
        let root = root("Test Root", ROOT_SERIAL);
        let ca = intermediate("Test CA", CA_SERIAL, &root);
        let leaf = leaf("Signer", LEAF_SERIAL, &ca);
        Self { root, ca, leaf }
    }

    /// One current CRL per issuer, revoking nothing.
    pub fn clean_crls(&self) -> Vec<Crl> {
        vec![current_crl(&self.root, &[]), current_crl(&self.ca, &[])]
    }
}

/// Serves a fixed chain and counts how often it was asked.
pub struct StaticAiaFetcher {
    pub chain: Vec<Certificate>,
    pub calls: AtomicUsize,
}

impl StaticAiaFetcher {
    pub fn new(chain: Vec<Certificate>) -> Self {
        Self {
            chain,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AiaFetcher for StaticAiaFetcher {
    fn download_chain(&self, _cert: &Certificate) -> Result<Vec<Certificate>, AiaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.chain.is_empty() {
            return Err(AiaError::NoCaIssuers);
        }
        Ok(self.chain.clone())
    }
}
