use crate::error::{FluxError, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A backend key handed out by the pool. `index` is the key's position in
/// the pool and is the only part that should ever be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub index: usize,
    secret: String,
}

impl Credential {
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &"***")
            .finish()
    }
}

/// Round-robin pool of fal keys. Concurrent callers each advance the
/// cursor once and never see an index outside the pool.
pub struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("keys", &self.keys.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

impl CredentialPool {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn next_credential(&self) -> Result<Credential> {
        let len = self.keys.len();
        if len == 0 {
            return Err(FluxError::ConfigError(
                "No fal credentials configured (set FAL_KEY)".into(),
            ));
        }

        let index = match self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some((current + 1) % len)
            }) {
            Ok(previous) | Err(previous) => previous % len,
        };

        log::debug!("Using FAL_KEY index: {}", index);
        Ok(Credential {
            index,
            secret: self.keys[index].clone(),
        })
    }
}
