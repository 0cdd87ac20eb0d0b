//! Host to application resolution.

use crate::config::ApplicationConfig;
use crate::inventory::Host;
use crate::utils::{GathererError, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Applications a host must collect, in lexicographic order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAssignment {
    pub host: Host,
    pub applications: BTreeSet<String>,
}

/// Map every host to the set of applications it must collect.
///
/// Applications of the host's groups are merged with the applications of
/// `universal_group`, which apply to every host whether or not it is a member.
/// Referencing an application missing from `catalog` is a configuration error.
pub fn resolve_groups(
    hosts: &[Host],
    node_groups: &BTreeMap<String, Vec<String>>,
    catalog: &BTreeMap<String, ApplicationConfig>,
    universal_group: &str,
) -> Result<Vec<HostAssignment>> {
    let mut unknown = Vec::new();
    for (group, apps) in node_groups {
        for app in apps {
            if !catalog.contains_key(app) {
                unknown.push(format!("'{}' (group '{}')", app, group));
            }
        }
    }
    if !unknown.is_empty() {
        return Err(GathererError::Config(format!(
            "unknown applications referenced: {}",
            unknown.join(", ")
        )));
    }

    let universal: BTreeSet<String> = node_groups
        .get(universal_group)
        .map(|apps| apps.iter().cloned().collect())
        .unwrap_or_default();

    let mut assignments: Vec<HostAssignment> = hosts
        .iter()
        .map(|host| {
            let mut applications = universal.clone();
            for group in &host.groups {
                if let Some(apps) = node_groups.get(group) {
                    applications.extend(apps.iter().cloned());
                }
            }
            if applications.is_empty() {
                tracing::warn!(
                    host = %host.name,
                    groups = ?host.groups,
                    "No applications configured for host"
                );
            }
            HostAssignment {
                host: host.clone(),
                applications,
            }
        })
        .collect();

    assignments.sort_by(|a, b| a.host.name.cmp(&b.host.name));
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::SshParams;

    fn ssh() -> SshParams {
        SshParams {
            user: "root".to_string(),
            port: 22,
            strict_host_key_checking: true,
            gateway: None,
        }
    }

    fn catalog(names: &[&str]) -> BTreeMap<String, ApplicationConfig> {
        names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    ApplicationConfig {
                        log_paths: vec![format!("/var/log/{}/*.log", n)],
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    fn groups(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(g, apps)| (g.to_string(), apps.iter().map(|a| a.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_universal_and_group_applications() {
        let hosts = vec![Host::new("h1", ssh()).with_groups(["webservers"])];
        let node_groups = groups(&[("_all_nodes", &["system"]), ("webservers", &["nginx"])]);

        let resolved =
            resolve_groups(&hosts, &node_groups, &catalog(&["system", "nginx"]), "_all_nodes")
                .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].applications.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["nginx", "system"]
        );
    }

    #[test]
    fn test_universal_applies_to_hosts_without_groups() {
        let hosts = vec![
            Host::new("lonely", ssh()),
            Host::new("db01", ssh()).with_groups(["databases", "webservers"]),
        ];
        let node_groups = groups(&[
            ("_all_nodes", &["system"]),
            ("webservers", &["nginx", "system"]),
            ("databases", &["postgresql", "nginx"]),
        ]);
        let catalog = catalog(&["system", "nginx", "postgresql"]);

        let resolved = resolve_groups(&hosts, &node_groups, &catalog, "_all_nodes").unwrap();

        // Sorted by host name
        assert_eq!(resolved[0].host.name, "db01");
        assert_eq!(resolved[0].applications.len(), 3);
        assert_eq!(resolved[1].host.name, "lonely");
        for assignment in &resolved {
            assert!(assignment.applications.contains("system"));
        }
    }

    #[test]
    fn test_unknown_application_is_config_error() {
        let hosts = vec![Host::new("h1", ssh())];
        let node_groups = groups(&[("webservers", &["nginx"])]);

        let err = resolve_groups(&hosts, &node_groups, &catalog(&["system"]), "_all_nodes")
            .unwrap_err();
        assert!(matches!(err, GathererError::Config(_)));
        assert!(err.to_string().contains("nginx"));
    }
}
