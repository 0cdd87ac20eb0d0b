//! Application name to systemd unit mapping for journal export.

/// Unit filter passed to journalctl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitFilter {
    /// No `-u` filter: the whole journal
    All,
    Unit(String),
}

impl UnitFilter {
    pub fn into_option(self) -> Option<String> {
        match self {
            UnitFilter::All => None,
            UnitFilter::Unit(unit) => Some(unit),
        }
    }
}

const KNOWN_UNITS: &[(&str, &str)] = &[
    ("apache", "apache2.service"),
    ("apache2", "apache2.service"),
    ("containerd", "containerd.service"),
    ("cron", "cron.service"),
    ("crond", "crond.service"),
    ("docker", "docker.service"),
    ("httpd", "httpd.service"),
    ("kubelet", "kubelet.service"),
    ("mariadb", "mariadb.service"),
    ("mysql", "mysql.service"),
    ("nginx", "nginx.service"),
    ("postgresql", "postgresql.service"),
    ("redis", "redis.service"),
    ("rsyslog", "rsyslog.service"),
    ("ssh", "ssh.service"),
    ("sshd", "sshd.service"),
    ("systemd", "systemd-journald.service"),
];

/// Resolve the unit filter for an application.
///
/// An explicit `override_unit` wins; `system` means the whole journal.
/// Returns `None` when the application has no known unit.
pub fn resolve_unit(application: &str, override_unit: Option<&str>) -> Option<UnitFilter> {
    if let Some(unit) = override_unit {
        return Some(UnitFilter::Unit(unit.to_string()));
    }
    if application == "system" {
        return Some(UnitFilter::All);
    }
    KNOWN_UNITS
        .iter()
        .find(|(app, _)| *app == application)
        .map(|(_, unit)| UnitFilter::Unit(unit.to_string()))
}
