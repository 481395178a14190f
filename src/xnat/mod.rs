// src/xnat/mod.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

pub mod client;
pub mod fake;

pub use client::{ClientSettings, XnatRegistry, XnatSession};
pub use fake::FakeRegistry;

/// Principal investigator attached to an XNAT project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investigator {
    pub firstname: String,
    pub lastname: String,
    pub title: String,
    pub email: String,
    pub institution: String,
}

/// The parts of an XNAT project we report on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub pi: Investigator,
}

/// Login for a registry. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Something that can open a session against a project registry.
pub trait Registry {
    type Session: RegistrySession;

    fn connect(&self, url: &str, credentials: &Credentials) -> Result<Self::Session>;
}

/// An open registry session.
pub trait RegistrySession {
    /// `Ok(None)` when the project does not exist; `Err` only for real failures.
    fn lookup(&mut self, project_id: &str) -> Result<Option<ProjectRecord>>;

    /// Release the session. Calling it twice is harmless.
    fn close(&mut self) -> Result<()>;
}

/// Look up `project_id`, treating "not found" as a routine outcome.
pub fn resolve_project<S: RegistrySession + ?Sized>(
    session: &mut S,
    project_id: &str,
) -> Result<Option<ProjectRecord>> {
    match session.lookup(project_id)? {
        Some(project) => {
            info!("Project: {}", project.name);
            Ok(Some(project))
        }
        None => {
            debug!(project_id, "project not found in XNAT, skipping");
            Ok(None)
        }
    }
}
