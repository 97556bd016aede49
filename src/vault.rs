//! Vault engine for encrypting configuration files in place and resolving
//! encrypted fragments.
//!
//! # Guarantees
//!
//! - **No plaintext caching**: decrypted bytes are returned to the caller and
//!   never retained
//! - **Atomic rewrites**: files are replaced via a temp file in the same
//!   directory and a rename, so an interrupted run never leaves a partially
//!   written file
//! - **Preserves permissions**: rewritten files keep their original mode
//!
//! # Operations
//!
//! - [`Vault::encrypt_file`]: wrap a plain file in an envelope
//! - [`Vault::decrypt_file`]: unwrap an envelope back to plaintext
//! - [`Vault::resolve_fragment`]: decrypt if needed, otherwise pass through

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::envelope::{self, Classification, Envelope};
use crate::error::{Error, Result};
use crate::kms::{KeyService, KmsContext};

/// Vault over a key-management service.
#[derive(Debug, Clone)]
pub struct Vault<K> {
    kms: K,
}

impl<K: KeyService> Vault<K> {
    pub fn new(kms: K) -> Self {
        Self { kms }
    }

    /// Get the underlying key service.
    pub fn key_service(&self) -> &K {
        &self.kms
    }

    /// Encrypt the file at `path` in place.
    ///
    /// A file that already holds a well-formed envelope is left untouched,
    /// so re-running encrypt over a directory is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or rewritten
    /// - The file holds a malformed envelope
    /// - `key_id` is empty or the key service fails
    ///
    /// # Example
    ///
    /// ```no_run
    /// use deckhand::kms::{AwsKms, KmsContext};
    /// use deckhand::vault::Vault;
    ///
    /// # async fn run() -> deckhand::Result<()> {
    /// let vault = Vault::new(AwsKms::new());
    /// vault
    ///     .encrypt_file("vars/db.json".as_ref(), "alias/deploy", &KmsContext::default())
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn encrypt_file(&self, path: &Path, key_id: &str, ctx: &KmsContext) -> Result<()> {
        let plaintext = fs::read(path).map_err(|e| Error::io(path, e))?;

        match envelope::classify(&plaintext) {
            Classification::Encrypted(_) => {
                warn!("{} is already encrypted, leaving it unchanged", path.display());
                return Ok(());
            }
            Classification::Malformed(reason) => {
                return Err(Error::EnvelopeCorrupt { reason }.in_file(path));
            }
            Classification::Plain => {}
        }

        let ciphertext = self
            .kms
            .encrypt(key_id, &plaintext, ctx)
            .await
            .map_err(|cause| {
                Error::KeyManagement {
                    key_id: key_id.to_string(),
                    cause,
                }
                .in_file(path)
            })?;
        let sealed = envelope::encode(key_id, &ciphertext).map_err(|e| e.in_file(path))?;

        write_atomically(path, &sealed)?;
        info!("Encrypted {} with key '{}'", path.display(), key_id);
        Ok(())
    }

    /// Decrypt the file at `path` in place.
    ///
    /// The envelope's own `key_id` takes precedence over `key_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEncrypted`] if the file is not an envelope. This
    /// is a user error, not a no-op; callers that want pass-through must use
    /// [`Vault::resolve_fragment`]. On any error the file is left unmodified.
    pub async fn decrypt_file(
        &self,
        path: &Path,
        key_id: Option<&str>,
        ctx: &KmsContext,
    ) -> Result<()> {
        let content = fs::read(path).map_err(|e| Error::io(path, e))?;

        let sealed = match envelope::classify(&content) {
            Classification::Encrypted(sealed) => sealed,
            Classification::Plain => {
                return Err(Error::NotEncrypted {
                    path: path.to_path_buf(),
                })
            }
            Classification::Malformed(reason) => {
                return Err(Error::EnvelopeCorrupt { reason }.in_file(path));
            }
        };

        let plaintext = self
            .open(&sealed, key_id, ctx)
            .await
            .map_err(|e| e.in_file(path))?;

        write_atomically(path, &plaintext)?;
        info!("Decrypted {}", path.display());
        Ok(())
    }

    /// Return the plaintext of a fragment: decrypted if it is an envelope,
    /// unchanged otherwise.
    ///
    /// Resolving plain content is idempotent and never calls the key
    /// service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnvelopeCorrupt`] for malformed envelopes and
    /// [`Error::KeyManagement`] if decryption fails.
    pub async fn resolve_fragment(
        &self,
        bytes: &[u8],
        key_id: Option<&str>,
        ctx: &KmsContext,
    ) -> Result<Vec<u8>> {
        match envelope::classify(bytes) {
            Classification::Plain => {
                debug!("Fragment is plain, using it verbatim");
                Ok(bytes.to_vec())
            }
            Classification::Encrypted(sealed) => {
                debug!("Fragment is encrypted, decrypting");
                self.open(&sealed, key_id, ctx).await
            }
            Classification::Malformed(reason) => Err(Error::EnvelopeCorrupt { reason }),
        }
    }

    async fn open(
        &self,
        sealed: &Envelope,
        key_id: Option<&str>,
        ctx: &KmsContext,
    ) -> Result<Vec<u8>> {
        let key_id = sealed.key_id.as_deref().or(key_id);

        self.kms
            .decrypt(key_id, &sealed.ciphertext, ctx)
            .await
            .map_err(|cause| Error::KeyManagement {
                key_id: key_id.unwrap_or("<from ciphertext>").to_string(),
                cause,
            })
    }
}

/// Replace `path` with `content` via a temp file in the same directory.
///
/// Symlinks are resolved first so the rewrite lands on the link target and
/// the link itself survives. The target's permissions are copied onto the
/// replacement.
fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let resolved = fs::canonicalize(path).map_err(|e| Error::io(path, e))?;
    let path = resolved.as_path();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    temp.write_all(content).map_err(|e| Error::io(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| Error::io(temp.path(), e))?;

    let permissions = fs::metadata(path)
        .map_err(|e| Error::io(path, e))?
        .permissions();
    fs::set_permissions(temp.path(), permissions).map_err(|e| Error::io(temp.path(), e))?;

    temp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}
