// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use certpath::{
    Certificate, CertificateValidationService, CrlCollection, InMemoryCertificatePool,
    PolicyRole, RevocationEvidenceIndex, RevocationMethod, ValidationConfig,
};
use clap::Parser;
use fs_err as fs;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{info, warn};

fn parse_time(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(s, &Rfc3339)
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Validation config (JSON)
    #[arg(short, long, env = "CERTPATH_CONFIG")]
    config: PathBuf,

    /// Certificate to validate, PEM or DER. Only the first certificate of a bundle is used.
    cert: PathBuf,

    /// Reference time in RFC 3339, defaults to the config value or now
    #[arg(long, value_parser = parse_time)]
    at: Option<OffsetDateTime>,

    /// Override the revocation method for CA certificates
    #[arg(long)]
    ca: Option<RevocationMethod>,

    /// Override the revocation method for the end-entity certificate
    #[arg(long)]
    end_entity: Option<RevocationMethod>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Download missing issuers over AIA caIssuers links
    #[cfg(feature = "aia-download")]
    #[arg(long, env = "CERTPATH_AIA")]
    aia: bool,
}

fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }
    let args = Args::parse();

    let config = ValidationConfig::load(&args.config)?;
    let target = Certificate::load(&args.cert)?
        .into_iter()
        .next()
        .with_context(|| format!("no certificate in {}", args.cert.display()))?;

    let mut policy = config.policy()?;
    if let Some(ca) = args.ca {
        policy.signer.ca = ca;
    }
    if let Some(end_entity) = args.end_entity {
        policy.signer.end_entity = end_entity;
    }
    let at = args
        .at
        .or(config.reference_time)
        .unwrap_or_else(OffsetDateTime::now_utc);

    let pool = Arc::new(InMemoryCertificatePool::new(config.load_intermediates()?));
    let crls = CrlCollection::new(config.load_crls()?);
    let evidence = Arc::new(RevocationEvidenceIndex::new().with_source(Arc::new(crls)));
    let service = CertificateValidationService::new(pool, policy.anchors.clone(), evidence);
    #[cfg(feature = "aia-download")]
    let service = if args.aia {
        service.with_aia(Arc::new(certpath::HttpAiaFetcher::default()))
    } else {
        service
    };

    info!("validating {} at {at}", target.subject_name());
    let result = service.validate_with_policy(&target, &policy, PolicyRole::Signer, at);
    let report = service.report(&result).to_json()?;
    match &args.output {
        Some(path) => fs::write(path, &report)?,
        None => println!("{report}"),
    }

    if !result.outcome.is_valid() {
        let detail = result.outcome.detail().unwrap_or_default();
        warn!("✗ {detail}");
        bail!("certificate is not valid: {:?}", result.outcome.status());
    }
    info!("✓ certificate path is valid");
    Ok(())
}
