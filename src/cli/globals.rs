use secrecy::SecretString;

/// Connection settings shared by every action.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub dsn: SecretString,
    pub redis_url: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(dsn: SecretString, redis_url: SecretString) -> Self {
        Self { dsn, redis_url }
    }
}
