//! npm registry resolution and safe tarball extraction.
//!
//! npm tarballs come from an untrusted registry, so extraction guards
//! against path traversal, unsafe entry types, and decompression bombs.

use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Deserialize;
use tar::Archive;
use tracing::debug;

use crate::error::{MarketplaceError, Result};

/// Maximum number of entries allowed in a tarball.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum total extracted size (200 MB).
const MAX_EXTRACTED_SIZE: u64 = 200 * 1024 * 1024;

/// npm registry base URL.
pub const NPM_REGISTRY: &str = "https://registry.npmjs.org";

#[derive(Debug, Deserialize)]
struct PackageMetadata {
    #[serde(rename = "dist-tags")]
    dist_tags: std::collections::HashMap<String, String>,
    versions: std::collections::HashMap<String, VersionMetadata>,
}

#[derive(Debug, Deserialize)]
struct VersionMetadata {
    dist: DistMetadata,
}

#[derive(Debug, Deserialize)]
struct DistMetadata {
    tarball: String,
}

/// Resolve the tarball URL for `package` at `version` (default: the
/// `latest` dist-tag).
pub async fn resolve_tarball_url(
    client: &reqwest::Client,
    marketplace: &str,
    package: &str,
    version: Option<&str>,
) -> Result<(String, String)> {
    let url = format!("{NPM_REGISTRY}/{package}");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| MarketplaceError::fetch(marketplace, e))?;
    if !response.status().is_success() {
        return Err(MarketplaceError::fetch(
            marketplace,
            format!("npm registry returned HTTP {} for {package}", response.status()),
        ));
    }
    let metadata: PackageMetadata = response
        .json()
        .await
        .map_err(|e| MarketplaceError::fetch(marketplace, e))?;

    let resolved = match version {
        Some(v) => v.to_string(),
        None => metadata
            .dist_tags
            .get("latest")
            .cloned()
            .ok_or_else(|| {
                MarketplaceError::fetch(marketplace, format!("{package} has no latest dist-tag"))
            })?,
    };
    let entry = metadata.versions.get(&resolved).ok_or_else(|| {
        MarketplaceError::fetch(
            marketplace,
            format!("{package}@{resolved} is not published"),
        )
    })?;
    debug!(package, version = %resolved, "npm tarball resolved");
    Ok((entry.dist.tarball.clone(), resolved))
}

/// Extract a gzip-compressed tarball into `dest`, returning the package
/// root (npm tarballs nest everything under `package/`).
pub fn extract_tarball(marketplace: &str, data: &[u8], dest: &Path) -> Result<PathBuf> {
    let decoder = GzDecoder::new(data);
    let mut archive = Archive::new(decoder);

    let mut entry_count = 0usize;
    let mut total_size = 0u64;

    for entry in archive.entries().map_err(|e| {
        MarketplaceError::UnsafeArchive {
            name: marketplace.to_string(),
            message: format!("unreadable archive: {e}"),
        }
    })? {
        let mut entry = entry.map_err(|e| MarketplaceError::UnsafeArchive {
            name: marketplace.to_string(),
            message: format!("unreadable entry: {e}"),
        })?;

        entry_count += 1;
        if entry_count > MAX_ENTRY_COUNT {
            return Err(MarketplaceError::UnsafeArchive {
                name: marketplace.to_string(),
                message: format!("more than {MAX_ENTRY_COUNT} entries"),
            });
        }

        let entry_type = entry.header().entry_type();
        if !matches!(
            entry_type,
            tar::EntryType::Regular | tar::EntryType::Directory
        ) {
            return Err(MarketplaceError::UnsafeArchive {
                name: marketplace.to_string(),
                message: format!("unsafe entry type {entry_type:?}"),
            });
        }

        total_size = total_size.saturating_add(entry.size());
        if total_size > MAX_EXTRACTED_SIZE {
            return Err(MarketplaceError::UnsafeArchive {
                name: marketplace.to_string(),
                message: "archive exceeds the extracted size limit".to_string(),
            });
        }

        let rel = entry
            .path()
            .map_err(|e| MarketplaceError::UnsafeArchive {
                name: marketplace.to_string(),
                message: format!("invalid entry path: {e}"),
            })?
            .into_owned();
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(MarketplaceError::UnsafeArchive {
                name: marketplace.to_string(),
                message: format!("entry path escapes destination: {}", rel.display()),
            });
        }

        let target = dest.join(&rel);
        if entry_type == tar::EntryType::Directory {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry.unpack(&target).map_err(|e| {
                MarketplaceError::UnsafeArchive {
                    name: marketplace.to_string(),
                    message: format!("failed to unpack {}: {e}", rel.display()),
                }
            })?;
        }
    }

    let package_root = dest.join("package");
    if package_root.is_dir() {
        Ok(package_root)
    } else {
        Ok(dest.to_path_buf())
    }
}
