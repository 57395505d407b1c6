//! Fixed on-disk layout for named datasets (spec §6: "Batch drivers accept
//! `--key`, `--variant`, `--all` flags to select named datasets under a
//! fixed on-disk layout").
//!
//! Layout: `<dataset_root>/<key>/<variant>/{in,out}_timestamps.csv`.

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Resolve which variant subdirectories to process for one dataset key.
pub fn resolve_variants(
    dataset_root: &Path,
    key: &str,
    variant: Option<&str>,
    all: bool,
) -> Result<Vec<String>> {
    let key_dir = dataset_root.join(key);
    if !key_dir.is_dir() {
        bail!("dataset key directory not found: {}", key_dir.display());
    }

    if let Some(variant) = variant {
        let variant_dir = key_dir.join(variant);
        if !variant_dir.is_dir() {
            bail!("dataset variant not found: {}", variant_dir.display());
        }
        return Ok(vec![variant.to_string()]);
    }

    if all {
        let mut variants = Vec::new();
        for entry in std::fs::read_dir(&key_dir)
            .with_context(|| format!("listing {}", key_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    variants.push(name.to_string());
                }
            }
        }
        variants.sort();
        if variants.is_empty() {
            bail!("no variants found under {}", key_dir.display());
        }
        return Ok(variants);
    }

    bail!("exactly one of --variant or --all must be given")
}
