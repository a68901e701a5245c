// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
    cert::Certificate,
    crl::Crl,
    policy::{CertificateReferenceRequirement, StaticSignaturePolicy},
    requirement::RevocationRequirement,
    trust::TrustAnchorStore,
};

/// JSON validation configuration. Relative paths are resolved against the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// PEM or DER files with trusted certificates.
    pub trust_anchors: Vec<PathBuf>,
    /// PEM or DER files with intermediate certificates for the pool.
    pub intermediates: Vec<PathBuf>,
    /// PEM or DER CRL files.
    pub crls: Vec<PathBuf>,
    pub revocation: RevocationRequirement,
    pub certificate_references: CertificateReferenceRequirement,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reference_time: Option<OffsetDateTime>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl ValidationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid validation config {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        debug!("loaded validation config from {}", path.display());
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn load_anchors(&self) -> Result<TrustAnchorStore> {
        if self.trust_anchors.is_empty() {
            bail!("no trust anchors configured");
        }
        let mut store = TrustAnchorStore::default();
        for file in &self.trust_anchors {
            for cert in Certificate::load(self.resolve(file))? {
                store.add(cert);
            }
        }
        info!("{} trust anchor(s) loaded", store.len());
        Ok(store)
    }

    pub fn load_intermediates(&self) -> Result<Vec<Certificate>> {
        let mut certs = Vec::new();
        for file in &self.intermediates {
            certs.extend(Certificate::load(self.resolve(file))?);
        }
        Ok(certs)
    }

    pub fn load_crls(&self) -> Result<Vec<Crl>> {
        let mut crls = Vec::new();
        for file in &self.crls {
            crls.extend(Crl::load(self.resolve(file))?);
        }
        Ok(crls)
    }

    pub fn policy(&self) -> Result<StaticSignaturePolicy> {
        Ok(StaticSignaturePolicy::new(self.load_anchors()?, self.revocation)
            .with_references(self.certificate_references))
    }
}
