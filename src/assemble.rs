//! Fragment discovery and ordered merging.
//!
//! A run starts from the base template, embeds the outer values (if any),
//! then embeds every fragment under the fragment directory in lexical
//! directory-walk order. Encrypted fragments are decrypted on the way in.
//! Any failure aborts the whole run; no partial document is returned.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::embed::{embed, unescape_literals, unresolved_placeholders};
use crate::error::{Error, Result};
use crate::kms::{KeyService, KmsContext};
use crate::settings::{self, Settings};
use crate::vault::Vault;

/// One fragment file, in the order it will be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRef {
    /// Path relative to the fragment directory
    pub relative_path: PathBuf,
    /// Position in discovery order
    pub order: usize,
}

/// List the `.json` files under `root`, recursively, in lexical order.
///
/// Within each directory entries are sorted by file name, so the result is
/// reproducible for the same directory contents. Symlinks are followed, so a
/// linked fragment is embedded like a regular one.
///
/// # Errors
///
/// Returns [`Error::Io`] if `root` or any directory below it cannot be read,
/// if a symlink is dangling, or if links form a loop.
pub fn discover_fragments(root: &Path) -> Result<Vec<FragmentRef>> {
    let mut fragments = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            Error::io(path, source)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if relative.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        fragments.push(FragmentRef {
            relative_path: relative.to_path_buf(),
            order: fragments.len(),
        });
    }

    debug!("Discovered {} fragment(s) under {}", fragments.len(), root.display());
    Ok(fragments)
}

/// Merges a base template with outer values and fragments.
///
/// Holds the vault and the key context for the duration of one run.
pub struct Assembler<'a, K> {
    vault: &'a Vault<K>,
    key_id: Option<&'a str>,
    ctx: &'a KmsContext,
}

impl<'a, K: KeyService> Assembler<'a, K> {
    pub fn new(vault: &'a Vault<K>, key_id: Option<&'a str>, ctx: &'a KmsContext) -> Self {
        Self { vault, key_id, ctx }
    }

    /// Produce the merged document.
    ///
    /// Outer values are embedded before any fragment. Fragments are then
    /// embedded one at a time into the already-merged text, so a fragment
    /// may resolve placeholders introduced by an earlier one.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Outer values or a fragment cannot be embedded
    /// - A fragment cannot be read or decrypted
    /// - Embed points remain after the last fragment, including `${name}`
    ///   inside longer strings
    /// - The result is not valid JSON
    pub async fn merge(
        &self,
        base: &str,
        outer_values: Option<&str>,
        fragment_root: Option<&Path>,
    ) -> Result<String> {
        let mut merged = match outer_values {
            Some(values) => embed(base, values).map_err(|e| match e {
                Error::Embed { reason, .. } => Error::embed("outer values", reason),
                other => other,
            })?,
            None => base.to_string(),
        };

        if let Some(root) = fragment_root {
            for fragment in discover_fragments(root)? {
                merged = self.embed_fragment(&merged, root, &fragment).await?;
            }
        }

        let unresolved = unresolved_placeholders(&merged)?;
        if !unresolved.is_empty() {
            return Err(Error::UnresolvedPlaceholders(unresolved));
        }

        unescape_literals(&merged)
    }

    /// Merge, parse, and resolve image tags.
    pub async fn materialize(
        &self,
        base: &str,
        outer_values: Option<&str>,
        fragment_root: Option<&Path>,
        override_tag: &str,
    ) -> Result<Settings> {
        let merged = self.merge(base, outer_values, fragment_root).await?;
        let settings = settings::parse(&merged)?;
        Ok(settings::normalize_image_tags(settings, override_tag))
    }

    async fn embed_fragment(
        &self,
        merged: &str,
        root: &Path,
        fragment: &FragmentRef,
    ) -> Result<String> {
        let path = root.join(&fragment.relative_path);
        info!(
            "Embedding fragment #{}: {}",
            fragment.order,
            fragment.relative_path.display()
        );

        let raw = fs::read(&path).map_err(|e| Error::io(&path, e))?;
        let plain = self
            .vault
            .resolve_fragment(&raw, self.key_id, self.ctx)
            .await
            .map_err(|e| e.in_file(&path))?;
        let text = String::from_utf8(plain).map_err(|_| {
            Error::embed("fragment", "content is not valid UTF-8").in_file(&path)
        })?;

        embed(merged, &text).map_err(|e| e.in_file(&path))
    }
}
