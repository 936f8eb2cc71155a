//! Breakpoint bookkeeping across the nominal → resolved lifecycle.
//!
//! A breakpoint is created from a client request (its *nominal* identity: how
//! the client asked for it) and resolved lazily against loaded scripts into
//! an engine-assigned id and normalized location (its *resolved* identity).
//! The registry keys breakpoints by a deterministic fingerprint of the
//! nominal identity, which doubles as the client-facing breakpoint id.

use std::collections::HashMap;

use lantern_diag::{DiagEngine, DiagError, ResolvedLocation, ScriptInfo};
use regex::Regex;

use crate::error::{AgentError, AgentResult};
use crate::protocol::Location;

#[derive(Clone, Debug)]
pub enum BreakpointQuery {
    Url(String),
    UrlRegex(String),
    Location { script_id: String },
}

impl BreakpointQuery {
    fn tag(&self) -> &'static str {
        match self {
            BreakpointQuery::Url(_) => "url",
            BreakpointQuery::UrlRegex(_) => "regex",
            BreakpointQuery::Location { .. } => "script",
        }
    }

    fn target(&self) -> &str {
        match self {
            BreakpointQuery::Url(url) => url,
            BreakpointQuery::UrlRegex(pattern) => pattern,
            BreakpointQuery::Location { script_id } => script_id,
        }
    }
}

#[derive(Debug)]
pub struct Breakpoint {
    query: BreakpointQuery,
    pattern: Option<Regex>,
    line: u32,
    column: u32,
    condition: Option<String>,
    script_id: Option<String>,
    resolved: Option<ResolvedLocation>,
}

impl Breakpoint {
    pub fn by_url(
        url: impl Into<String>,
        line: u32,
        column: u32,
        condition: Option<String>,
    ) -> Self {
        Self::new(BreakpointQuery::Url(url.into()), None, line, column, condition)
    }

    pub fn by_url_regex(
        pattern: impl Into<String>,
        line: u32,
        column: u32,
        condition: Option<String>,
    ) -> AgentResult<Self> {
        let pattern = pattern.into();
        let compiled =
            Regex::new(&pattern).map_err(|err| AgentError::InvalidUrlRegex(err.to_string()))?;
        Ok(Self::new(
            BreakpointQuery::UrlRegex(pattern),
            Some(compiled),
            line,
            column,
            condition,
        ))
    }

    pub fn at_location(location: &Location, condition: Option<String>) -> Self {
        let mut breakpoint = Self::new(
            BreakpointQuery::Location {
                script_id: location.script_id.clone(),
            },
            None,
            location.line_number,
            location.column_number,
            condition,
        );
        breakpoint.script_id = Some(location.script_id.clone());
        breakpoint
    }

    fn new(
        query: BreakpointQuery,
        pattern: Option<Regex>,
        line: u32,
        column: u32,
        condition: Option<String>,
    ) -> Self {
        Self {
            query,
            pattern,
            line,
            column,
            condition: condition.filter(|c| !c.is_empty()),
            script_id: None,
            resolved: None,
        }
    }

    /// Deterministic textual fingerprint of the nominal identity; also the
    /// client-facing breakpoint id.
    pub fn fingerprint(&self) -> String {
        let mut key = format!(
            "{}:{}:{}:{}",
            self.query.tag(),
            self.line,
            self.column,
            self.query.target()
        );
        if let Some(condition) = &self.condition {
            key.push(':');
            key.push_str(condition);
        }
        key
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn script_id(&self) -> Option<&str> {
        self.script_id.as_deref()
    }

    pub fn resolved(&self) -> Option<&ResolvedLocation> {
        self.resolved.as_ref()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    fn matches(&self, script: &ScriptInfo) -> bool {
        match &self.query {
            BreakpointQuery::Url(url) => !url.is_empty() && *url == script.url,
            BreakpointQuery::UrlRegex(_) => self
                .pattern
                .as_ref()
                .is_some_and(|pattern| pattern.is_match(&script.url)),
            BreakpointQuery::Location { script_id } => *script_id == script.script_id,
        }
    }

    /// Bind the breakpoint to `script` when the query matches it. Returns
    /// whether the breakpoint now targets this script.
    pub fn bind_script(&mut self, script: &ScriptInfo) -> bool {
        if !self.matches(script) {
            return false;
        }
        self.script_id = Some(script.script_id.clone());
        true
    }

    /// Ask the engine to plant the breakpoint in its bound script. Returns
    /// `Ok(true)` when the engine accepted it, `Ok(false)` when the script is
    /// gone or the breakpoint did not land.
    pub fn resolve<E: DiagEngine>(&mut self, engine: &E) -> AgentResult<bool> {
        let script_id = self
            .script_id
            .clone()
            .ok_or(AgentError::ScriptMustBeLoaded)?;

        match engine.set_breakpoint(&script_id, self.line, self.column) {
            Ok(resolved) => {
                self.resolved = Some(resolved);
                Ok(true)
            }
            Err(DiagError::ScriptNotFound(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// The engine-normalized location, available once resolved.
    pub fn actual_location(&self) -> Option<Location> {
        let resolved = self.resolved.as_ref()?;
        let script_id = self.script_id.clone()?;
        Some(Location {
            script_id,
            line_number: resolved.line,
            column_number: resolved.column,
        })
    }
}

#[derive(Default)]
pub struct BreakpointRegistry {
    breakpoints: HashMap<String, Breakpoint>,
}

impl BreakpointRegistry {
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.breakpoints.contains_key(fingerprint)
    }

    pub fn insert(&mut self, breakpoint: Breakpoint) -> AgentResult<()> {
        let fingerprint = breakpoint.fingerprint();
        if self.breakpoints.contains_key(&fingerprint) {
            return Err(AgentError::BreakpointExists);
        }
        self.breakpoints.insert(fingerprint, breakpoint);
        Ok(())
    }

    pub fn remove(&mut self, fingerprint: &str) -> Option<Breakpoint> {
        self.breakpoints.remove(fingerprint)
    }

    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Breakpoint)> {
        self.breakpoints.iter_mut()
    }

    pub fn find_by_resolved_id(
        &mut self,
        breakpoint_id: lantern_diag::EngineBreakpointId,
    ) -> Option<(&String, &mut Breakpoint)> {
        self.breakpoints
            .iter_mut()
            .find(|(_, bp)| bp.resolved().is_some_and(|r| r.breakpoint_id == breakpoint_id))
    }

    /// Engine breakpoint ids of every resolved registration.
    pub fn resolved_ids(&self) -> Vec<lantern_diag::EngineBreakpointId> {
        self.breakpoints
            .values()
            .filter_map(|bp| bp.resolved().map(|r| r.breakpoint_id))
            .collect()
    }

    /// Whether an already-registered breakpoint is equivalent to `candidate`.
    ///
    /// A resolved candidate compares by engine id; an unresolved one by its
    /// nominal `(script, line, column)` target. Both predicates are needed:
    /// a single by-URL request may resolve against several scripts, and the
    /// engine reports one id for semantically equivalent requests.
    pub fn has_equivalent(&self, candidate: &Breakpoint) -> bool {
        self.breakpoints.values().any(|existing| {
            if let Some(resolved) = candidate.resolved() {
                existing
                    .resolved()
                    .is_some_and(|r| r.breakpoint_id == resolved.breakpoint_id)
            } else {
                existing.script_id() == candidate.script_id()
                    && existing.script_id().is_some()
                    && existing.line() == candidate.line()
                    && existing.column() == candidate.column()
            }
        })
    }
}
