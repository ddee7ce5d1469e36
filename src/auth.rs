// Credential loading: finds the personal access token on disk, refuses to
// use it when the file is readable by anyone but its owner, and exposes it
// to the HTTP client through the `TokenSource` capability.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Token file name, relative to the user's home directory.
pub const TOKEN_FILE: &str = ".github-gist-token";

/// Permission bits that must be clear on the token file (group and other).
#[cfg(unix)]
const FORBIDDEN_MODE_BITS: u32 = 0o077;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("reading token: cannot determine home directory; use --token <file>")]
    Home,

    #[error("reading token: {err}\n\n{}", remediation(.display))]
    Read { display: String, err: io::Error },

    #[error("reading token: {display} mode is {actual:04o}, want {expected:04o}")]
    Permissions {
        display: String,
        actual: u32,
        expected: u32,
    },

    #[error("reading token: {display} is not valid UTF-8")]
    NotText { display: String },

    #[error("reading token: {display} is empty")]
    Empty { display: String },
}

fn remediation(display: &str) -> String {
    format!(
        "Please create a personal access token at https://github.com/settings/tokens/new\n\
         and write it to {} to use this program.\n\
         The token only needs the gist scope; it does not need any other permissions.\n\
         The benefit of using a personal access token over using your GitHub\n\
         password directly is that you can limit its use and revoke it at any time.\n",
        display
    )
}

/// Where the token lives, plus the name to show the user in messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLocation {
    pub path: PathBuf,
    pub display: String,
}

impl TokenLocation {
    /// Use the `--token` override if given, otherwise `$HOME/.github-gist-token`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, CredentialError> {
        if let Some(path) = explicit {
            return Ok(TokenLocation {
                path: path.to_path_buf(),
                display: path.display().to_string(),
            });
        }
        let home = dirs::home_dir().ok_or(CredentialError::Home)?;
        Ok(TokenLocation {
            path: home.join(TOKEN_FILE),
            display: format!("$HOME/{}", TOKEN_FILE),
        })
    }
}

/// Read the token at `location`, check its mode, and return it trimmed.
pub fn load_token(location: &TokenLocation) -> Result<String, CredentialError> {
    let data = std::fs::read(&location.path).map_err(|err| CredentialError::Read {
        display: location.display.clone(),
        err,
    })?;

    check_permissions(location)?;

    let data = String::from_utf8(data).map_err(|_| CredentialError::NotText {
        display: location.display.clone(),
    })?;
    let token = data.trim();
    if token.is_empty() {
        return Err(CredentialError::Empty {
            display: location.display.clone(),
        });
    }
    tracing::debug!(path = %location.path.display(), "loaded access token");
    Ok(token.to_string())
}

#[cfg(unix)]
fn check_permissions(location: &TokenLocation) -> Result<(), CredentialError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(&location.path).map_err(|err| CredentialError::Read {
        display: location.display.clone(),
        err,
    })?;
    let mode = meta.permissions().mode();
    if mode & FORBIDDEN_MODE_BITS != 0 {
        return Err(CredentialError::Permissions {
            display: location.display.clone(),
            actual: mode & 0o777,
            expected: mode & 0o700,
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_location: &TokenLocation) -> Result<(), CredentialError> {
    Ok(())
}

/// Something that can hand out the current access token on demand.
pub trait TokenSource {
    fn access_token(&self) -> anyhow::Result<String>;
}

/// A token fixed at construction time.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

// Never print the secret itself.
impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}
