//! Common testing utilities for deckhand integration tests.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use deckhand::envelope;
use deckhand::kms::{KeyService, KmsContext, KmsError};
use tempfile::TempDir;

/// Key ID used by every test that needs one.
#[allow(dead_code)]
pub const TEST_KEY_ID: &str = "alias/test-deploy";

/// Test context that manages temporary files and directories.
pub struct TestContext {
    /// Path to temporary directory
    pub temp_path: PathBuf,
    /// The temporary directory (kept to prevent early deletion)
    _temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a temporary directory.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        let temp_path = temp_dir.path().to_path_buf();

        Ok(Self {
            temp_path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a test file with content, creating parent directories.
    pub fn create_file(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let file_path = self.temp_path.join(name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&file_path)?;
        file.write_all(content.as_bytes())?;
        Ok(file_path)
    }

    /// Create an envelope file whose ciphertext `StubKms` decrypts to
    /// `plaintext`.
    #[allow(dead_code)]
    pub fn create_encrypted(&self, name: &str, plaintext: &str) -> anyhow::Result<PathBuf> {
        let sealed = envelope::encode(TEST_KEY_ID, &StubKms::seal(plaintext.as_bytes()))?;
        let content = String::from_utf8(sealed)?;
        self.create_file(name, &content)
    }

    /// Get the path to a file in the temp directory.
    #[allow(dead_code)]
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_path.join(name)
    }
}

/// Key service whose decrypt is the exact inverse of its encrypt.
///
/// Ciphertext is the plaintext XORed with a fixed byte, so it never looks
/// like the input.
#[derive(Default)]
pub struct StubKms {
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
}

impl StubKms {
    const MASK: u8 = 0x5a;

    pub fn seal(plaintext: &[u8]) -> Vec<u8> {
        plaintext.iter().map(|b| b ^ Self::MASK).collect()
    }

    #[allow(dead_code)]
    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyService for StubKms {
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        _ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError> {
        if key_id.is_empty() {
            return Err(KmsError::MissingKeyId);
        }
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::seal(plaintext))
    }

    async fn decrypt(
        &self,
        _key_id: Option<&str>,
        ciphertext: &[u8],
        _ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::seal(ciphertext))
    }
}

/// Key service that rejects every call, like a revoked key.
#[allow(dead_code)]
pub struct FailingKms;

#[async_trait]
impl KeyService for FailingKms {
    async fn encrypt(
        &self,
        _key_id: &str,
        _plaintext: &[u8],
        _ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError> {
        Err(KmsError::Service("AccessDeniedException: key is disabled".to_string()))
    }

    async fn decrypt(
        &self,
        _key_id: Option<&str>,
        _ciphertext: &[u8],
        _ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError> {
        Err(KmsError::Service("AccessDeniedException: key is disabled".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_kms_seal_is_involution() {
        let sealed = StubKms::seal(b"{\"Foo\":\"Bar\"}");
        assert_ne!(sealed, b"{\"Foo\":\"Bar\"}");
        assert_eq!(StubKms::seal(&sealed), b"{\"Foo\":\"Bar\"}");
    }

    #[test]
    fn test_test_context_create_file() {
        let ctx = TestContext::new().unwrap();
        let file_path = ctx.create_file("nested/test.txt", "Hello, World!").unwrap();

        assert!(file_path.exists());
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "Hello, World!");
    }
}
