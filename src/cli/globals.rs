use crate::sessions::config::{DEFAULT_MAX_LOGIN_ATTEMPTS, DEFAULT_SESSION_TTL_SECONDS};

/// Connection settings and session policy shared by every action.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub dsn: String,
    pub redis_url: String,
    pub session_ttl: u64,
    pub max_login_attempts: i32,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(dsn: String, redis_url: String) -> Self {
        Self {
            dsn,
            redis_url,
            session_ttl: DEFAULT_SESSION_TTL_SECONDS,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_session_ttl(mut self, seconds: u64) -> Self {
        self.session_ttl = seconds;
        self
    }

    #[must_use]
    pub fn with_max_login_attempts(mut self, attempts: i32) -> Self {
        self.max_login_attempts = attempts;
        self
    }
}
