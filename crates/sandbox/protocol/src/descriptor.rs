//! Service descriptor: what the guest init runs, one record per service.
//!
//! The text form is line oriented. Each record starts with a `[service]`
//! header followed by its fields in a fixed order:
//!
//! ```text
//! [service]
//! name=main
//! argv.0=/bin/sh
//! argv.1=-c
//! env.HOME=/root
//! user=root
//! group=root
//! workdir=/
//! ```
//!
//! The guest parser does no unescaping, so fields that would contain a line
//! break or NUL are rejected when the descriptor is built.

use crate::naming::is_valid_service_name;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Name of the record describing the primary session.
pub const PRIMARY_SERVICE_NAME: &str = "main";

const RECORD_HEADER: &str = "[service]";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor has no service records")]
    Empty,

    #[error("invalid service name '{0}'")]
    InvalidName(String),

    #[error("duplicate service name '{0}'")]
    DuplicateName(String),

    #[error("service '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("service '{service}': {field} contains a line break or NUL")]
    ForbiddenCharacter { service: String, field: String },

    #[error("service '{service}': invalid environment key '{key}'")]
    InvalidEnvKey { service: String, key: String },

    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// A single command the guest init launches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub argv: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub user: String,
    pub group: String,
    pub workdir: String,
}

impl ServiceRecord {
    fn validate(&self) -> Result<(), DescriptorError> {
        if !is_valid_service_name(&self.name) {
            return Err(DescriptorError::InvalidName(self.name.clone()));
        }
        if self.argv.is_empty() {
            return Err(DescriptorError::EmptyCommand(self.name.clone()));
        }

        let forbidden = |field: String| DescriptorError::ForbiddenCharacter {
            service: self.name.clone(),
            field,
        };

        for (i, arg) in self.argv.iter().enumerate() {
            if has_separator(arg) {
                return Err(forbidden(format!("argv.{i}")));
            }
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') || has_separator(key) {
                return Err(DescriptorError::InvalidEnvKey {
                    service: self.name.clone(),
                    key: key.clone(),
                });
            }
            if has_separator(value) {
                return Err(forbidden(format!("env.{key}")));
            }
        }
        for (field, value) in [
            ("user", &self.user),
            ("group", &self.group),
            ("workdir", &self.workdir),
        ] {
            if has_separator(value) {
                return Err(forbidden(field.to_string()));
            }
        }
        Ok(())
    }
}

fn has_separator(s: &str) -> bool {
    s.contains(['\n', '\r', '\0'])
}

/// Validated, immutable list of service records.
///
/// Record 0 is the primary session; the rest are auxiliary services in the
/// order they were configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    records: Vec<ServiceRecord>,
}

impl ServiceDescriptor {
    pub fn new(records: Vec<ServiceRecord>) -> Result<Self, DescriptorError> {
        if records.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let mut seen = HashSet::new();
        for record in &records {
            record.validate()?;
            if !seen.insert(record.name.as_str()) {
                return Err(DescriptorError::DuplicateName(record.name.clone()));
            }
        }

        Ok(Self { records })
    }

    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub fn primary(&self) -> &ServiceRecord {
        &self.records[0]
    }

    pub fn services(&self) -> &[ServiceRecord] {
        &self.records[1..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializes the descriptor into its text form.
    pub fn to_text(&self) -> String {
        self.to_string()
    }

    /// Parses the text form produced by [`ServiceDescriptor::to_text`].
    pub fn parse(text: &str) -> Result<Self, DescriptorError> {
        let mut records = Vec::new();
        let mut current: Option<PartialRecord> = None;

        for (idx, line) in text.split('\n').enumerate() {
            let line_no = idx + 1;
            if line.is_empty() {
                continue;
            }

            if line == RECORD_HEADER {
                if let Some(partial) = current.take() {
                    records.push(partial.finish(line_no)?);
                }
                current = Some(PartialRecord::default());
                continue;
            }

            let Some(partial) = current.as_mut() else {
                return Err(malformed(line_no, "field outside of a [service] record"));
            };
            let Some((key, value)) = line.split_once('=') else {
                return Err(malformed(line_no, "expected key=value"));
            };
            partial.set(key, value, line_no)?;
        }

        if let Some(partial) = current.take() {
            records.push(partial.finish(text.lines().count())?);
        }

        Self::new(records)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{RECORD_HEADER}")?;
            writeln!(f, "name={}", record.name)?;
            for (i, arg) in record.argv.iter().enumerate() {
                writeln!(f, "argv.{i}={arg}")?;
            }
            for (key, value) in &record.env {
                writeln!(f, "env.{key}={value}")?;
            }
            writeln!(f, "user={}", record.user)?;
            writeln!(f, "group={}", record.group)?;
            writeln!(f, "workdir={}", record.workdir)?;
        }
        Ok(())
    }
}

fn malformed(line: usize, reason: impl Into<String>) -> DescriptorError {
    DescriptorError::Malformed {
        line,
        reason: reason.into(),
    }
}

// Field position within a record; keys must appear in non-decreasing order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    #[default]
    Start,
    Name,
    Argv,
    Env,
    User,
    Group,
    Workdir,
}

#[derive(Debug, Default)]
struct PartialRecord {
    stage: Stage,
    name: Option<String>,
    argv: Vec<String>,
    env: BTreeMap<String, String>,
    user: Option<String>,
    group: Option<String>,
    workdir: Option<String>,
}

impl PartialRecord {
    fn advance(
        &mut self,
        next: Stage,
        repeatable: bool,
        line: usize,
    ) -> Result<(), DescriptorError> {
        if next < self.stage || (next == self.stage && !repeatable) {
            return Err(malformed(line, "field out of order or repeated"));
        }
        self.stage = next;
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str, line: usize) -> Result<(), DescriptorError> {
        match key {
            "name" => {
                self.advance(Stage::Name, false, line)?;
                self.name = Some(value.to_string());
            }
            "user" => {
                self.advance(Stage::User, false, line)?;
                self.user = Some(value.to_string());
            }
            "group" => {
                self.advance(Stage::Group, false, line)?;
                self.group = Some(value.to_string());
            }
            "workdir" => {
                self.advance(Stage::Workdir, false, line)?;
                self.workdir = Some(value.to_string());
            }
            _ => {
                if let Some(index) = key.strip_prefix("argv.") {
                    self.advance(Stage::Argv, true, line)?;
                    let index: usize = index
                        .parse()
                        .map_err(|_| malformed(line, format!("invalid argv index '{index}'")))?;
                    if index != self.argv.len() {
                        return Err(malformed(line, format!("expected argv.{}", self.argv.len())));
                    }
                    self.argv.push(value.to_string());
                } else if let Some(env_key) = key.strip_prefix("env.") {
                    self.advance(Stage::Env, true, line)?;
                    if let Some((last, _)) = self.env.last_key_value()
                        && last.as_str() >= env_key
                    {
                        return Err(malformed(line, format!("env.{env_key} out of order")));
                    }
                    self.env.insert(env_key.to_string(), value.to_string());
                } else {
                    return Err(malformed(line, format!("unknown key '{key}'")));
                }
            }
        }
        Ok(())
    }

    fn finish(self, line: usize) -> Result<ServiceRecord, DescriptorError> {
        let missing = |field: &str| malformed(line, format!("record is missing '{field}'"));
        Ok(ServiceRecord {
            name: self.name.ok_or_else(|| missing("name"))?,
            argv: self.argv,
            env: self.env,
            user: self.user.ok_or_else(|| missing("user"))?,
            group: self.group.ok_or_else(|| missing("group"))?,
            workdir: self.workdir.ok_or_else(|| missing("workdir"))?,
        })
    }
}
