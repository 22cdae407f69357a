//! Credential storage for the access/refresh token pair
//!
//! The transport reads tokens through the `TokenStore` trait and never owns
//! the persistence itself. Two stores ship with the crate:
//!
//! - `MemoryTokenStore`: process-local, lost on exit.
//! - `FileTokenStore`: a JSON file holding one token pair. Writes use atomic
//!   temp-file + rename; a tokio Mutex serializes concurrent writers (login
//!   and refresh can race).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::TokenPair;

/// Persisted-credential boundary consumed by the transport.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
/// `Arc<dyn TokenStore>`.
pub trait TokenStore: Send + Sync {
    /// Current access token, if any.
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    /// Current refresh token, if any.
    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    /// Replace both tokens.
    fn set_tokens(&self, tokens: TokenPair) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Forget all credentials (forces a fresh login).
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// In-memory token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing token pair.
    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            state: RwLock::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().await;
            state
                .as_ref()
                .filter(|t| !t.access_token.is_empty())
                .map(|t| Secret::new(t.access_token.clone()))
        })
    }

    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().await;
            state
                .as_ref()
                .filter(|t| !t.refresh_token.is_empty())
                .map(|t| Secret::new(t.refresh_token.clone()))
        })
    }

    fn set_tokens(&self, tokens: TokenPair) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = Some(tokens);
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = None;
            Ok(())
        })
    }
}

/// File-backed token store.
///
/// Reads are served from memory; every write is persisted before returning.
/// `clear` removes the file so a later `load` starts logged out.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<Option<TokenPair>>,
}

impl FileTokenStore {
    /// Load tokens from the given path.
    ///
    /// A missing file is a cold start with no credentials; nothing is
    /// created until the first `set_tokens`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading token file: {e}")))?;
            let tokens: TokenPair = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), "loaded stored credentials");
            Some(tokens)
        } else {
            info!(path = %path.display(), "token file not found, starting logged out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state
                .as_ref()
                .filter(|t| !t.access_token.is_empty())
                .map(|t| Secret::new(t.access_token.clone()))
        })
    }

    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            state
                .as_ref()
                .filter(|t| !t.refresh_token.is_empty())
                .map(|t| Secret::new(t.refresh_token.clone()))
        })
    }

    fn set_tokens(&self, tokens: TokenPair) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &tokens).await?;
            *state = Some(tokens);
            debug!(path = %self.path.display(), "stored new tokens");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = None;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(format!("removing token file: {e}"))),
            }
            debug!(path = %self.path.display(), "cleared stored tokens");
            Ok(())
        })
    }
}

/// Write the token pair to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Permissions are 0600 on unix since the file holds tokens.
async fn write_atomic(path: &Path, tokens: &TokenPair) -> Result<()> {
    let json = serde_json::to_string_pretty(tokens)
        .map_err(|e| Error::CredentialParse(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}
