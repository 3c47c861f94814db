//! Splitting bulk contracts into one file per interaction

use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};

use super::Contract;
use crate::errors::{HarnessError, Result};

/// Rewrites an interaction's `request` object before it is written out
pub type RequestFilter<'a> = &'a dyn Fn(&mut JsonMap<String, JsonValue>);

/// Split `bulk` into single-interaction contracts under `out_dir`
///
/// Files are named `<consumer>-<provider>.<description>.json`. Every
/// `filter` runs on each interaction's `request` object.
///
/// # Returns
/// Paths written, in interaction order
///
/// # Errors
/// `Contract` when the bulk file cannot be read or parsed, or holds no
/// interactions.
pub fn split_bulk_file<P, Q>(bulk: P, out_dir: Q, filters: &[RequestFilter<'_>]) -> Result<Vec<PathBuf>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let bulk = bulk.as_ref();
    let out_dir = out_dir.as_ref();

    fs::create_dir_all(out_dir).map_err(|e| {
        HarnessError::Contract(format!("Couldn't create output directory {}: {}", out_dir.display(), e))
    })?;

    let bytes = fs::read(bulk).map_err(|e| {
        HarnessError::Contract(format!("Couldn't read contract {}: {}", bulk.display(), e))
    })?;
    let contract: Contract = serde_json::from_slice(&bytes).map_err(|e| {
        HarnessError::Contract(format!("Couldn't parse contract {}: {}", bulk.display(), e))
    })?;

    let mut parts = contract.split();
    if parts.is_empty() {
        return Err(HarnessError::Contract(format!(
            "No interactions found in {}",
            bulk.display()
        )));
    }

    let mut written = Vec::with_capacity(parts.len());
    for (idx, part) in parts.iter_mut().enumerate() {
        for interaction in part.interactions.iter_mut() {
            if let Some(request) = interaction.get_mut("request").and_then(JsonValue::as_object_mut) {
                for filter in filters {
                    filter(request);
                }
            }
        }

        let description = part.interactions[0]
            .get("description")
            .and_then(JsonValue::as_str)
            .map(sanitize)
            .unwrap_or_else(|| format!("interaction-{}", idx));

        let path = out_dir.join(format!(
            "{}-{}.{}.json",
            part.consumer.name, part.provider.name, description
        ));
        fs::write(&path, serde_json::to_vec(part)?)?;
        tracing::debug!(file = %path.display(), "wrote split contract");
        written.push(path);
    }

    Ok(written)
}

fn sanitize(description: &str) -> String {
    description.replace(['/', '\\'], "")
}
