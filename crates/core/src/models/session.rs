use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A local login session established after a successful assertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginSession {
    pub id: String,
    pub member_id: i64,
    pub saml_session_index: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LoginSession {
    pub fn new(member_id: i64, session_index: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            member_id,
            saml_session_index: session_index,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
