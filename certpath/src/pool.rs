// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Intermediate certificate sources.

use std::sync::{PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use crate::cert::Certificate;

#[derive(Debug, Error)]
pub enum AiaError {
    #[error("certificate has no AIA caIssuers URL")]
    NoCaIssuers,
    #[error("failed to download issuer from {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid issuer certificate from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Certificates available for chain building.
pub trait CertificatePool: Send + Sync {
    fn all_certificates(&self) -> Vec<Certificate>;

    /// Add certificates; `from_network` marks AIA downloads for reporting.
    fn add_certificates(&self, certs: &[Certificate], from_network: bool);

    fn was_fetched_online(&self, _cert: &Certificate) -> bool {
        false
    }

    /// Every certificate whose subject matches `cert`'s issuer, in pool order.
    fn issuer_candidates(&self, cert: &Certificate) -> Vec<Certificate> {
        self.all_certificates()
            .into_iter()
            .filter(|c| cert.is_named_issuer(c) && c != cert)
            .collect()
    }

    fn issuer_certificate(&self, cert: &Certificate) -> Option<Certificate> {
        self.issuer_candidates(cert)
            .into_iter()
            .find(|c| cert.verify_signed_by(c).is_ok())
    }
}

/// Downloads the issuer chain of a certificate via Authority Information Access.
pub trait AiaFetcher: Send + Sync {
    fn download_chain(&self, cert: &Certificate) -> Result<Vec<Certificate>, AiaError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCertificatePool {
    certs: RwLock<Vec<PooledCertificate>>,
}

#[derive(Debug, Clone)]
struct PooledCertificate {
    cert: Certificate,
    from_network: bool,
}

impl InMemoryCertificatePool {
    pub fn new(certs: impl IntoIterator<Item = Certificate>) -> Self {
        let pool = Self::default();
        let certs: Vec<_> = certs.into_iter().collect();
        pool.add_certificates(&certs, false);
        pool
    }

    pub fn len(&self) -> usize {
        self.certs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CertificatePool for InMemoryCertificatePool {
    fn all_certificates(&self) -> Vec<Certificate> {
        self.certs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| p.cert.clone())
            .collect()
    }

    fn add_certificates(&self, certs: &[Certificate], from_network: bool) {
        let mut pooled = self.certs.write().unwrap_or_else(PoisonError::into_inner);
        for cert in certs {
            if pooled.iter().any(|p| &p.cert == cert) {
                continue;
            }
            debug!(
                "pool: added {} (online: {from_network})",
                cert.subject_name()
            );
            pooled.push(PooledCertificate {
                cert: cert.clone(),
                from_network,
            });
        }
    }

    fn was_fetched_online(&self, cert: &Certificate) -> bool {
        self.certs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| &p.cert == cert && p.from_network)
    }
}

/// Follows caIssuers links over HTTP until a self-signed certificate or a dead end.
#[cfg(feature = "aia-download")]
#[derive(Debug, Clone)]
pub struct HttpAiaFetcher {
    pub max_depth: usize,
}

#[cfg(feature = "aia-download")]
impl Default for HttpAiaFetcher {
    fn default() -> Self {
        Self { max_depth: 8 }
    }
}

#[cfg(feature = "aia-download")]
impl HttpAiaFetcher {
    fn download_cert(url: &str) -> Result<Vec<u8>, AiaError> {
        use anyhow::{bail, Context};

        debug!("downloading issuer certificate from {url}");
        let fetch = || -> anyhow::Result<Vec<u8>> {
            let response = reqwest::blocking::get(url)
                .with_context(|| format!("failed to download certificate from {url}"))?;
            if !response.status().is_success() {
                bail!(
                    "certificate download failed with status: {}",
                    response.status()
                );
            }
            Ok(response
                .bytes()
                .context("failed to read certificate response body")?
                .to_vec())
        };
        fetch().map_err(|source| AiaError::Download {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(feature = "aia-download")]
impl AiaFetcher for HttpAiaFetcher {
    fn download_chain(&self, cert: &Certificate) -> Result<Vec<Certificate>, AiaError> {
        let mut chain = Vec::new();
        let mut current = cert.clone();
        for _ in 0..self.max_depth {
            let Some(url) = current.ca_issuers_urls().first().cloned() else {
                break;
            };
            let der = Self::download_cert(&url)?;
            let parent = Certificate::from_der(&der)
                .or_else(|_| {
                    Certificate::from_pem_bundle(&der).and_then(|mut certs| {
                        certs
                            .drain(..)
                            .next()
                            .ok_or_else(|| anyhow::anyhow!("empty PEM bundle"))
                    })
                })
                .map_err(|source| AiaError::Parse {
                    url: url.clone(),
                    source,
                })?;
            let self_signed = parent.is_self_signed();
            chain.push(parent.clone());
            if self_signed {
                debug!("found self-signed cert at {url} - stopping");
                break;
            }
            current = parent;
        }
        if chain.is_empty() {
            return Err(AiaError::NoCaIssuers);
        }
        debug!("AIA: downloaded {} certificate(s)", chain.len());
        Ok(chain)
    }
}
