//! Container fixtures shared by the integration suites.
//!
//! Every fixture checks for a reachable container runtime first; suites call
//! [`runtime::ensure_container_runtime`] and skip when it fails.

pub mod postgres;
pub mod redis;
pub mod runtime;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct TestNetwork {
    name: String,
}

impl TestNetwork {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            name: unique_name(prefix),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) fn unique_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}
