// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::sync::Arc;

use certpath::{
    revocation::CrlChecker, CertPath, CertificatePool, ChainBuilder, CrlCollection,
    InMemoryCertificatePool, PathError, RevocationCheck, RevocationEvidenceIndex,
    RevocationFailure, TrustAnchorStore,
};
use common::*;

fn assert_ordered(path: &CertPath) {
    let certs = path.certificates();
    assert!(!certs.is_empty());
    for pair in certs.windows(2) {
        assert_eq!(pair[0].issuer_raw(), pair[1].subject_raw());
    }
    assert_eq!(
        certs[certs.len() - 1].issuer_raw(),
        path.anchor().certificate().subject_raw()
    );
}

#[test]
fn test_build_three_certificate_chain() {
    init_tracing();
    let chain = TestChain::new();
    let pool = InMemoryCertificatePool::new([chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);

    let path = ChainBuilder::new(&pool, &anchors)
        .build(&chain.leaf.cert, reference_time(), None)
        .expect("path should be built");

    assert_ordered(&path);
    assert_eq!(
        path.certificates(),
        &[chain.leaf.cert.clone(), chain.ca.cert.clone()]
    );
    assert_eq!(path.anchor().certificate(), &chain.root.cert);
    assert_eq!(path.ca_certificates(), &[chain.ca.cert.clone()]);
}

#[test]
fn test_anchor_as_target() {
    let chain = TestChain::new();
    let pool = InMemoryCertificatePool::default();
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);

    let path = ChainBuilder::new(&pool, &anchors)
        .build(&chain.root.cert, reference_time(), None)
        .unwrap();
    assert_eq!(path.certificates(), &[chain.root.cert.clone()]);
    assert_ordered(&path);
}

#[test]
fn test_expired_target_returns_best_effort_path() {
    init_tracing();
    let chain = TestChain::new();
    let expired = leaf_valid_between(
        "Old Signer",
        10,
        &chain.ca,
        date(2024, 1, 1),
        date(2024, 6, 1),
    );
    let pool = InMemoryCertificatePool::new([chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);

    let err = ChainBuilder::new(&pool, &anchors)
        .build(&expired.cert, reference_time(), None)
        .unwrap_err();
    let PathError::Expired { path } = &err else {
        panic!("expected an expired error, got {err:?}");
    };
    assert_ordered(path);
    assert_eq!(path.end_entity(), &expired.cert);
    assert!(err.is_temporal());
}

#[test]
fn test_not_yet_valid_target_returns_best_effort_path() {
    let chain = TestChain::new();
    let future = leaf_valid_between(
        "New Signer",
        11,
        &chain.ca,
        date(2026, 1, 1),
        date(2027, 1, 1),
    );
    let pool = InMemoryCertificatePool::new([chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);

    let err = ChainBuilder::new(&pool, &anchors)
        .build(&future.cert, reference_time(), None)
        .unwrap_err();
    match err {
        PathError::NotYetValid { path } => assert_ordered(&path),
        other => panic!("expected not-yet-valid, got {other:?}"),
    }
}

#[test]
fn test_no_trust_anchors() {
    let chain = TestChain::new();
    let pool = InMemoryCertificatePool::new([chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::default();

    let err = ChainBuilder::new(&pool, &anchors)
        .build(&chain.leaf.cert, reference_time(), None)
        .unwrap_err();
    assert!(matches!(err, PathError::InvalidAlgorithmParameters(_)));
}

#[test]
fn test_intermediate_anchor_does_not_terminate() {
    let chain = TestChain::new();
    let other = root("Other Root", 99);
    let pool = InMemoryCertificatePool::new([chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::new([chain.ca.cert.clone(), other.cert.clone()]);

    let err = ChainBuilder::new(&pool, &anchors)
        .build(&chain.leaf.cert, reference_time(), None)
        .unwrap_err();
    assert_eq!(err, PathError::NoPathFound);
}

#[test]
fn test_impostor_issuer_is_skipped() {
    let chain = TestChain::new();
    // Same name as the real CA, different key.
    let impostor = intermediate("Test CA", CA_SERIAL, &chain.root);
    let pool = InMemoryCertificatePool::new([impostor.cert.clone(), chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);

    let path = ChainBuilder::new(&pool, &anchors)
        .build(&chain.leaf.cert, reference_time(), None)
        .unwrap();
    assert_eq!(path.certificates()[1], chain.ca.cert);
}

#[test]
fn test_aia_fallback_persists_downloads() {
    init_tracing();
    let chain = TestChain::new();
    let pool = InMemoryCertificatePool::default();
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);
    let aia = StaticAiaFetcher::new(vec![chain.ca.cert.clone(), chain.root.cert.clone()]);

    let path = ChainBuilder::new(&pool, &anchors)
        .with_aia(Some(&aia))
        .build(&chain.leaf.cert, reference_time(), None)
        .unwrap();
    assert_ordered(&path);
    assert_eq!(aia.calls(), 1);
    assert!(pool.was_fetched_online(&chain.ca.cert));

    // The pool now resolves the issuer without going online.
    ChainBuilder::new(&pool, &anchors)
        .with_aia(Some(&aia))
        .build(&chain.leaf.cert, reference_time(), None)
        .unwrap();
    assert_eq!(aia.calls(), 1);
}

#[test]
fn test_aia_failure_is_reported() {
    let chain = TestChain::new();
    let pool = InMemoryCertificatePool::default();
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);
    let aia = StaticAiaFetcher::new(vec![]);

    let err = ChainBuilder::new(&pool, &anchors)
        .with_aia(Some(&aia))
        .build(&chain.leaf.cert, reference_time(), None)
        .unwrap_err();
    assert!(matches!(err, PathError::IssuerUnavailable { .. }), "{err:?}");
}

#[test]
fn test_revocation_while_building_names_certificate() {
    init_tracing();
    let chain = TestChain::new();
    let pool = InMemoryCertificatePool::new([chain.ca.cert.clone()]);
    let anchors = TrustAnchorStore::new([chain.root.cert.clone()]);
    let crls = vec![
        current_crl(&chain.root, &[(CA_SERIAL, date(2025, 5, 10))]),
        current_crl(&chain.ca, &[]),
    ];
    let index = RevocationEvidenceIndex::new().with_source(Arc::new(CrlCollection::new(crls)));
    let checker = CrlChecker::new(&index, reference_time());

    let err = ChainBuilder::new(&pool, &anchors)
        .build(&chain.leaf.cert, reference_time(), Some(&checker as &dyn RevocationCheck))
        .unwrap_err();
    match err {
        PathError::Revocation {
            certificate,
            failure: RevocationFailure::Revoked { revoked_at, crl },
        } => {
            assert_eq!(certificate, chain.ca.cert);
            assert_eq!(revoked_at, date(2025, 5, 10));
            assert!(crl.is_some_and(|crl| crl.is_issued_by(&chain.root.cert)));
        }
        other => panic!("expected revocation failure, got {other:?}"),
    }

    // Without the checker the same path builds.
    assert!(ChainBuilder::new(&pool, &anchors)
        .build(&chain.leaf.cert, reference_time(), None)
        .is_ok());
}

#[test]
fn test_cert_path_rejects_broken_chain() {
    let chain = TestChain::new();
    let other = root("Other Root", 99);
    let anchor = certpath::TrustAnchor::new(other.cert.clone());
    let err = CertPath::new(vec![chain.leaf.cert.clone(), chain.ca.cert.clone()], anchor)
        .unwrap_err();
    assert_eq!(err, PathError::NameChaining { position: 1 });
}
