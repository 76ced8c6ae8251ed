use chrono::{DateTime, Duration, Utc};

use hs_core::StoredCredential;

/// The agent's bearer token state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// A credential holding only a refresh token. The first protected
    /// request refreshes it.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self::new(String::new(), refresh_token, DateTime::<Utc>::UNIX_EPOCH)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_empty() || now >= self.expires_at
    }

    /// Expired, or expiring within `window` of `now`
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        let window = Duration::from_std(window).unwrap_or(Duration::zero());
        self.is_expired_at(now) || self.expires_at - now < window
    }

    pub fn needs_refresh(&self, window: std::time::Duration) -> bool {
        self.needs_refresh_at(Utc::now(), window)
    }
}

impl From<StoredCredential> for AccessCredential {
    fn from(stored: StoredCredential) -> Self {
        Self::new(
            stored.access_token,
            stored.refresh_token,
            stored.access_token_expires_at,
        )
    }
}

impl From<&AccessCredential> for StoredCredential {
    fn from(cred: &AccessCredential) -> Self {
        StoredCredential {
            access_token: cred.access_token.clone(),
            refresh_token: cred.refresh_token.clone(),
            access_token_expires_at: cred.expires_at,
        }
    }
}
