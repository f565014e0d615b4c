use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Packaging ecosystems a dependency can belong to.
///
/// The variant selects which package-system adapter interprets the
/// dependency's name and version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Pip,
    Apt,
}

impl System {
    pub fn as_str(&self) -> &'static str {
        match self {
            System::Pip => "pip",
            System::Apt => "apt",
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for System {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pip" => Ok(System::Pip),
            "apt" => Ok(System::Apt),
            other => anyhow::bail!("Unknown package system '{}'", other),
        }
    }
}

/// A package pinned (or not) to a version within one packaging system.
///
/// Version strings are opaque here; only the owning adapter may order
/// or compare them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub system: System,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: Option<String>, system: System) -> Self {
        Self {
            name: name.into(),
            version,
            system,
        }
    }

    pub fn unpinned(name: impl Into<String>, system: System) -> Self {
        Self::new(name, None, system)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{} ({})", self.name, version, self.system),
            None => write!(f, "{} ({})", self.name, self.system),
        }
    }
}

/// A command plus its arguments, ready to hand to a sandbox or render
/// into a recipe line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Render as a single shell line, space-joined.
    pub fn shell_line(&self) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shell_line())
    }
}
