// src/xnat/client.rs

use anyhow::{anyhow, Context, Result};
use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, time::Duration};
use tracing::{debug, info, warn};
use url::Url;

use super::{Credentials, Investigator, ProjectRecord, Registry, RegistrySession};
use crate::error::DiskUsageError;

/// HTTP knobs for talking to XNAT.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: concat!("xnat-scripts/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// XNAT over its REST API. Sessions are JSESSION cookies.
#[derive(Debug, Clone, Default)]
pub struct XnatRegistry {
    settings: ClientSettings,
}

impl XnatRegistry {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

impl Registry for XnatRegistry {
    type Session = XnatSession;

    #[tracing::instrument(level = "debug", skip(self, credentials), fields(user = %credentials.user))]
    fn connect(&self, url: &str, credentials: &Credentials) -> Result<XnatSession> {
        let base = parse_base_url(url)?;
        let client = Client::builder()
            .cookie_store(true)
            .timeout(self.settings.timeout)
            .user_agent(self.settings.user_agent.as_str())
            .build()
            .context("building HTTP client")?;

        let connect_error = |reason: String| DiskUsageError::Connect {
            url: url.to_string(),
            reason,
        };

        let login = endpoint(&base, &["data", "JSESSION"])?;
        let resp = client
            .post(login)
            .basic_auth(&credentials.user, Some(&credentials.password))
            .send()
            .map_err(|e| connect_error(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(connect_error(format!("login returned HTTP {}", status)).into());
        }

        info!("Connected to {}", url);
        Ok(XnatSession {
            client,
            base,
            open: true,
        })
    }
}

/// A logged-in XNAT session.
#[derive(Debug)]
pub struct XnatSession {
    client: Client,
    base: Url,
    open: bool,
}

impl RegistrySession for XnatSession {
    fn lookup(&mut self, project_id: &str) -> Result<Option<ProjectRecord>> {
        let mut url = endpoint(&self.base, &["data", "projects", project_id])?;
        url.query_pairs_mut().append_pair("format", "json");

        debug!(%url, "GET project");
        let resp = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET project {} from {}", project_id, self.base))?;

        match resp.status() {
            // XNAT answers 403 for projects the account may not see
            status @ (StatusCode::NOT_FOUND | StatusCode::FORBIDDEN) => {
                debug!(project_id, %status, "project not visible, skipping");
                return Ok(None);
            }
            status if !status.is_success() => {
                return Err(DiskUsageError::Lookup {
                    project_id: project_id.to_string(),
                    status: status.as_u16(),
                }
                .into())
            }
            _ => {}
        }

        let body: ResultSet = resp
            .json()
            .with_context(|| format!("decoding project {} JSON", project_id))?;
        Ok(project_from_result_set(body, project_id))
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let logout = endpoint(&self.base, &["data", "JSESSION"])?;
        let resp = self
            .client
            .delete(logout)
            .send()
            .with_context(|| format!("closing XNAT session on {}", self.base))?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "XNAT did not acknowledge logout");
        }
        info!("Disconnected.");
        Ok(())
    }
}

fn parse_base_url(url: &str) -> Result<Url> {
    let invalid = |reason: String| DiskUsageError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme `{}`", other)).into()),
    }
}

/// `base` + path segments, each segment percent-encoded on its own.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| anyhow!("{} cannot be used as a base URL", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// ─── XNAT JSON result set ───────────────────────────────────────────
//
// {"items":[{"data_fields":{"ID":..,"name":..},
//            "children":[{"field":"PI","items":[{"data_fields":{"firstname":..}}]}]}]}

#[derive(Debug, Default, Deserialize)]
struct ResultSet {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Default, Deserialize)]
struct Item {
    #[serde(default)]
    data_fields: HashMap<String, Value>,
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    #[serde(default)]
    field: String,
    #[serde(default)]
    items: Vec<Item>,
}

impl Item {
    fn text(&self, key: &str) -> String {
        match self.data_fields.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn child(&self, field: &str) -> Option<&Item> {
        self.children
            .iter()
            .find(|c| c.field == field)
            .and_then(|c| c.items.first())
    }
}

fn project_from_result_set(set: ResultSet, requested_id: &str) -> Option<ProjectRecord> {
    let item = set.items.into_iter().next()?;

    let pi = match item.child("PI") {
        Some(pi) => Investigator {
            firstname: pi.text("firstname"),
            lastname: pi.text("lastname"),
            title: pi.text("title"),
            email: pi.text("email"),
            institution: pi.text("institution"),
        },
        // project listings flatten the PI into the project's own fields
        None => Investigator {
            firstname: item.text("pi_firstname"),
            lastname: item.text("pi_lastname"),
            ..Default::default()
        },
    };

    let id = match item.text("ID") {
        id if id.is_empty() => requested_id.to_string(),
        id => id,
    };
    Some(ProjectRecord {
        id,
        name: item.text("name"),
        pi,
    })
}
