use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Placeholder namespace stored on SSH forwards, which have no Kubernetes coordinates.
pub const SSH_NAMESPACE: &str = "default";

const DEFAULT_BIND_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardType {
    #[default]
    Kubectl,
    Ssh,
}

impl fmt::Display for ForwardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardType::Kubectl => write!(f, "kubectl"),
            ForwardType::Ssh => write!(f, "ssh"),
        }
    }
}

impl FromStr for ForwardType {
    type Err = InvalidConfig;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubectl" | "k8s" | "kubernetes" => Ok(ForwardType::Kubectl),
            "ssh" => Ok(ForwardType::Ssh),
            other => Err(InvalidConfig::UnknownType(other.to_string())),
        }
    }
}

/// A named port forward the operator wants to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    pub name: String,
    /// Kubernetes context, or the SSH host for SSH forwards.
    pub context: String,
    pub namespace: String,
    /// Kubernetes service, or the SSH host for SSH forwards.
    pub service: String,
    /// `"local:remote"` mappings, or a bare `"port"` when both sides match.
    pub ports: Vec<String>,
    #[serde(default)]
    pub local_interface: Option<String>,
    #[serde(default)]
    pub forward_type: ForwardType,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidConfig {
    #[error("name must not be empty")]
    EmptyName,
    #[error("at least one port mapping is required")]
    NoPorts,
    #[error("invalid port mapping '{0}' (expected local:remote)")]
    BadPort(String),
    #[error("{0} must not be empty for kubectl forwards")]
    MissingField(&'static str),
    #[error("SSH host must not be empty")]
    MissingHost,
    #[error("unknown forward type '{0}' (expected kubectl or ssh)")]
    UnknownType(String),
}

/// A parsed `"local:remote"` port mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl FromStr for PortMapping {
    type Err = InvalidConfig;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidConfig::BadPort(s.to_string());
        let parse = |p: &str| match p.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(bad()),
            Ok(port) => Ok(port),
        };
        match s.trim().split_once(':') {
            Some((local, remote)) => Ok(Self {
                local: parse(local)?,
                remote: parse(remote)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(Self {
                    local: port,
                    remote: port,
                })
            }
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

impl ForwardConfig {
    /// Build an SSH forward. The host lands in both `context` and `service`.
    pub fn ssh(name: impl Into<String>, host: impl Into<String>, ports: Vec<String>) -> Self {
        let host = host.into();
        Self {
            name: name.into(),
            context: host.clone(),
            namespace: SSH_NAMESPACE.to_string(),
            service: host,
            ports,
            local_interface: None,
            forward_type: ForwardType::Ssh,
        }
    }

    pub fn kubectl(
        name: impl Into<String>,
        context: impl Into<String>,
        namespace: impl Into<String>,
        service: impl Into<String>,
        ports: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            namespace: namespace.into(),
            service: service.into(),
            ports,
            local_interface: None,
            forward_type: ForwardType::Kubectl,
        }
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.name.trim().is_empty() {
            return Err(InvalidConfig::EmptyName);
        }
        if self.ports.is_empty() {
            return Err(InvalidConfig::NoPorts);
        }
        self.port_mappings()?;
        match self.forward_type {
            ForwardType::Kubectl => {
                if self.namespace.trim().is_empty() {
                    return Err(InvalidConfig::MissingField("namespace"));
                }
                if self.service.trim().is_empty() {
                    return Err(InvalidConfig::MissingField("service"));
                }
            }
            ForwardType::Ssh => {
                if self.service.trim().is_empty() {
                    return Err(InvalidConfig::MissingHost);
                }
            }
        }
        Ok(())
    }

    pub fn port_mappings(&self) -> Result<Vec<PortMapping>, InvalidConfig> {
        self.ports.iter().map(|p| p.parse()).collect()
    }

    /// Display group: every SSH forward shares one group, kubectl forwards group by context.
    pub fn group_key(&self) -> &str {
        match self.forward_type {
            ForwardType::Ssh => "SSH",
            ForwardType::Kubectl => &self.context,
        }
    }

    /// Human-readable description of where the forward points.
    pub fn target(&self) -> String {
        match self.forward_type {
            ForwardType::Ssh => format!("ssh {}", self.service),
            ForwardType::Kubectl => format!("{}/{}", self.namespace, self.service),
        }
    }

    /// Bind IP and optional local port override from `local_interface`,
    /// which may be `ip` or `ip:port`.
    pub fn bind_address(&self) -> (String, Option<u16>) {
        match self.local_interface.as_deref().map(str::trim) {
            None | Some("") => (DEFAULT_BIND_IP.to_string(), None),
            Some(iface) => match iface.rsplit_once(':') {
                Some((ip, port)) => match port.parse::<u16>() {
                    Ok(port) => (ip.to_string(), Some(port)),
                    Err(_) => (iface.to_string(), None),
                },
                None => (iface.to_string(), None),
            },
        }
    }

    /// Local ports the forward will listen on. An `ip:port` interface
    /// replaces every local port of an SSH forward; kubectl binds only the IP.
    pub fn local_ports(&self) -> Vec<u16> {
        let port_override = match self.forward_type {
            ForwardType::Ssh => self.bind_address().1,
            ForwardType::Kubectl => None,
        };
        self.ports
            .iter()
            .filter_map(|p| p.parse::<PortMapping>().ok())
            .map(|m| port_override.unwrap_or(m.local))
            .collect()
    }

    /// Local ports below 1024, which need root to bind.
    pub fn privileged_ports(&self) -> Vec<u16> {
        self.local_ports().into_iter().filter(|&p| p < 1024).collect()
    }
}

/// Name used when the operator leaves it blank: `<service>-<port>` for
/// kubectl, `<host>-<port>` for SSH (any `user@` prefix dropped).
pub fn derive_name(forward_type: ForwardType, service: &str, host: &str, ports: &[String]) -> String {
    let port = ports
        .first()
        .and_then(|p| p.split(':').next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("unknown");
    match forward_type {
        ForwardType::Ssh => {
            let host = host.rsplit('@').next().unwrap_or(host);
            format!("{}-{}", host, port)
        }
        ForwardType::Kubectl => format!("{}-{}", service, port),
    }
}

/// Split a comma-separated port list as typed into a form.
pub fn split_ports(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
