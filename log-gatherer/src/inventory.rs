//! Ansible-style INI inventory parsing.
//!
//! Produces the host list with group membership and per-host SSH parameters.
//! Supported syntax: `[group]` sections with host lines (`name key=value ...`),
//! `[group:children]` sections nesting groups, and `[group:vars]` sections,
//! which are accepted and ignored. Hosts listed before any section belong to
//! `ungrouped`.

use crate::archive::ARCHIVE_DIR;
use crate::utils::{GathererError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// SSH jump host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    pub host: String,
    pub user: String,
    pub port: u16,
}

/// SSH connection parameters for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshParams {
    pub user: String,
    pub port: u16,
    pub strict_host_key_checking: bool,
    pub gateway: Option<Gateway>,
}

/// A remote node from the inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Inventory name; used for local directory and archive names
    pub name: String,

    /// Address used to connect (`ansible_host`, defaults to `name`)
    pub address: String,

    pub ssh: SshParams,

    pub groups: BTreeSet<String>,
}

impl Host {
    pub fn new(name: impl Into<String>, ssh: SshParams) -> Self {
        let name = name.into();
        Self {
            address: name.clone(),
            name,
            ssh,
            groups: BTreeSet::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// `user@address` target for ssh/rsync
    pub fn ssh_target(&self) -> String {
        format!("{}@{}", self.ssh.user, self.address)
    }
}

enum Section {
    Hosts(String),
    Children(String),
    Vars,
}

#[derive(Debug, Default)]
pub struct Inventory {
    hosts: BTreeMap<String, Host>,
}

impl Inventory {
    pub fn from_file(path: &Path, defaults: &SshParams) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GathererError::Inventory(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, defaults)
    }

    pub fn parse(content: &str, defaults: &SshParams) -> Result<Self> {
        let mut hosts: BTreeMap<String, Host> = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut section = Section::Hosts("ungrouped".to_string());

        for (idx, raw) in content.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let header = header.strip_suffix(']').ok_or_else(|| {
                    GathererError::Inventory(format!(
                        "line {}: unterminated section header",
                        lineno
                    ))
                })?;
                section = match header.split_once(':') {
                    Some((group, "children")) => Section::Children(group.to_string()),
                    Some((_, "vars")) => Section::Vars,
                    Some((_, kind)) => {
                        return Err(GathererError::Inventory(format!(
                            "line {}: unknown section kind '{}'",
                            lineno, kind
                        )))
                    }
                    None => Section::Hosts(header.to_string()),
                };
                continue;
            }

            match &section {
                Section::Vars => {}
                Section::Children(parent) => {
                    children
                        .entry(parent.clone())
                        .or_default()
                        .push(line.to_string());
                }
                Section::Hosts(group) => {
                    let mut parts = line.split_whitespace();
                    let Some(name) = parts.next() else { continue };
                    if let Err(e) = check_host_name(name) {
                        return Err(GathererError::Inventory(format!("line {}: {}", lineno, e)));
                    }
                    let host = hosts
                        .entry(name.to_string())
                        .or_insert_with(|| Host::new(name, defaults.clone()));
                    host.groups.insert(group.clone());

                    for var in parts {
                        let (key, value) = var.split_once('=').ok_or_else(|| {
                            GathererError::Inventory(format!(
                                "line {}: expected key=value, got '{}'",
                                lineno, var
                            ))
                        })?;
                        apply_host_var(host, key, value).map_err(|e| {
                            GathererError::Inventory(format!("line {}: {}", lineno, e))
                        })?;
                    }
                }
            }
        }

        // Members of a child group are also members of the parent group
        let mut changed = true;
        while changed {
            changed = false;
            for host in hosts.values_mut() {
                for (parent, kids) in &children {
                    if !host.groups.contains(parent)
                        && kids.iter().any(|kid| host.groups.contains(kid))
                    {
                        host.groups.insert(parent.clone());
                        changed = true;
                    }
                }
            }
        }

        Ok(Self { hosts })
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn groups(&self) -> BTreeSet<&str> {
        self.hosts
            .values()
            .flat_map(|h| h.groups.iter().map(String::as_str))
            .collect()
    }

    /// Keep only the named hosts; unknown names are an error.
    pub fn retain_hosts(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        if let Some(missing) = names.iter().find(|n| !self.hosts.contains_key(*n)) {
            return Err(GathererError::Inventory(format!(
                "host '{}' is not in the inventory",
                missing
            )));
        }
        self.hosts.retain(|name, _| names.contains(name));
        Ok(())
    }

    pub fn into_hosts(self) -> Vec<Host> {
        self.hosts.into_values().collect()
    }
}

/// Host names become directories under the storage root
fn check_host_name(name: &str) -> std::result::Result<(), String> {
    if name == ARCHIVE_DIR {
        return Err(format!("host name '{}' is reserved for archives", name));
    }
    if name.starts_with('.') || name.contains('/') {
        return Err(format!("host name '{}' is not a valid directory name", name));
    }
    Ok(())
}

fn apply_host_var(host: &mut Host, key: &str, value: &str) -> std::result::Result<(), String> {
    let value = value.trim_matches(|c| c == '"' || c == '\'');
    match key {
        "ansible_host" => host.address = value.to_string(),
        "ansible_user" => host.ssh.user = value.to_string(),
        "ansible_port" => {
            host.ssh.port = value
                .parse()
                .map_err(|_| format!("invalid ansible_port '{}'", value))?;
        }
        _ => {}
    }
    Ok(())
}
