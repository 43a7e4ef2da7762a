use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Renew proactively once less than this many minutes remain
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
}

/// The bearer token issued by the backend, with its expiry and owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>, user: User) -> Self {
        Self {
            token: token.into(),
            expires_at,
            user,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the credential will expire soon and should be renewed
    pub fn needs_refresh(&self) -> bool {
        Utc::now() + Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES) >= self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }

    /// Same token and user, new expiry.
    pub fn with_expiry(&self, expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: 7,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        }
    }

    #[test]
    fn test_credential_expiry() {
        let fresh = Credential::new("t", Utc::now() + Duration::minutes(30), user());
        assert!(!fresh.is_expired());
        assert!(!fresh.needs_refresh());
        assert!(fresh.minutes_until_expiry() >= 29);

        let stale = Credential::new("t", Utc::now() - Duration::minutes(1), user());
        assert!(stale.is_expired());
        assert_eq!(stale.minutes_until_expiry(), 0);
    }

    #[test]
    fn test_credential_needs_refresh_inside_buffer() {
        let soon = Credential::new("t", Utc::now() + Duration::minutes(3), user());
        assert!(!soon.is_expired());
        assert!(soon.needs_refresh());
    }

    #[test]
    fn test_with_expiry_keeps_token_and_user() {
        let original = Credential::new("t1", Utc::now(), user());
        let later = Utc::now() + Duration::hours(1);
        let updated = original.with_expiry(later);
        assert_eq!(updated.token, "t1");
        assert_eq!(updated.user, original.user);
        assert_eq!(updated.expires_at, later);
    }
}
