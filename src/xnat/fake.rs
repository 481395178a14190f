// src/xnat/fake.rs

use anyhow::{bail, Result};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use super::{Credentials, ProjectRecord, Registry, RegistrySession};
use crate::error::DiskUsageError;

/// Call counts shared between a [`FakeRegistry`] and its sessions.
#[derive(Debug, Clone, Default)]
pub struct FakeCounters {
    connects: Arc<AtomicUsize>,
    lookups: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FakeCounters {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// In-memory registry for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct FakeRegistry {
    projects: Arc<HashMap<String, ProjectRecord>>,
    failing: Arc<HashSet<String>>,
    refuse_connect: bool,
    counters: FakeCounters,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project: ProjectRecord) -> Self {
        Arc::make_mut(&mut self.projects).insert(project.id.clone(), project);
        self
    }

    /// Lookups of `project_id` fail with a non-routine error.
    pub fn failing_on(mut self, project_id: &str) -> Self {
        Arc::make_mut(&mut self.failing).insert(project_id.to_string());
        self
    }

    /// Every `connect` is rejected.
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn counters(&self) -> FakeCounters {
        self.counters.clone()
    }
}

impl Registry for FakeRegistry {
    type Session = FakeSession;

    fn connect(&self, url: &str, _credentials: &Credentials) -> Result<FakeSession> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect {
            return Err(DiskUsageError::Connect {
                url: url.to_string(),
                reason: "connection refused by fake registry".into(),
            }
            .into());
        }
        Ok(FakeSession {
            projects: Arc::clone(&self.projects),
            failing: Arc::clone(&self.failing),
            counters: self.counters.clone(),
            open: true,
        })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    projects: Arc<HashMap<String, ProjectRecord>>,
    failing: Arc<HashSet<String>>,
    counters: FakeCounters,
    open: bool,
}

impl RegistrySession for FakeSession {
    fn lookup(&mut self, project_id: &str) -> Result<Option<ProjectRecord>> {
        if !self.open {
            bail!("lookup of '{}' on a closed session", project_id);
        }
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(project_id) {
            return Err(DiskUsageError::Lookup {
                project_id: project_id.to_string(),
                status: 500,
            }
            .into());
        }
        Ok(self.projects.get(project_id).cloned())
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
