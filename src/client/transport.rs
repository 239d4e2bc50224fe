//! Daemon endpoints
//!
//! Scheme dispatch: `unix://` names a local socket, `tcp://` (and `http(s)://`)
//! a TCP address, `ssh://` a remote host reached through
//! `docker system dial-stdio`.

use crate::connection::ConnectionSpec;
use crate::error::TransportError;
use std::path::PathBuf;
use tracing::warn;

/// Conventional Docker ports
const DOCKER_PORT: u16 = 2375;
const DOCKER_TLS_PORT: u16 = 2376;

/// A dialable daemon endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// HTTP over a local Unix socket
    Unix { path: PathBuf },
    /// HTTP over TCP; `address` is `host:port`
    Tcp { address: String, secure: bool },
    /// HTTP over an SSH-forwarded `dial-stdio` session
    Ssh(SshTarget),
}

/// Parsed `ssh://[user@]host[:port]` destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub opts: Vec<String>,
}

impl SshTarget {
    /// Arguments passed to the `ssh` binary
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.opts.clone();
        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push("--".to_string());
        args.push(self.host.clone());
        args.extend(["docker", "system", "dial-stdio"].map(String::from));
        args
    }
}

impl Transport {
    /// Pick the endpoint for a resolved spec
    pub fn for_spec(spec: &ConnectionSpec) -> Result<Self, TransportError> {
        let (scheme, rest) = spec
            .host
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidHost {
                host: spec.host.clone(),
                reason: "missing scheme (expected unix://, tcp:// or ssh://)".to_string(),
            })?;

        if scheme != "ssh" && !spec.ssh_opts.is_empty() {
            warn!("Ignoring ssh_opts for non-ssh host {}", spec.host);
        }

        match scheme {
            "unix" => {
                if rest.is_empty() {
                    return Err(TransportError::InvalidHost {
                        host: spec.host.clone(),
                        reason: "empty socket path".to_string(),
                    });
                }
                if spec.wants_tls() {
                    warn!("TLS material is ignored for unix socket {}", spec.host);
                }
                Ok(Transport::Unix {
                    path: PathBuf::from(rest),
                })
            }
            "tcp" | "http" | "https" => {
                let secure = scheme == "https" || spec.wants_tls();
                Ok(Transport::Tcp {
                    address: tcp_address(&spec.host, rest, secure)?,
                    secure,
                })
            }
            "ssh" => Ok(Transport::Ssh(parse_ssh(&spec.host, rest, &spec.ssh_opts)?)),
            other => Err(TransportError::UnsupportedScheme {
                scheme: other.to_string(),
                host: spec.host.clone(),
            }),
        }
    }
}

/// `host:port`, with the conventional port only when none was declared
fn tcp_address(host: &str, rest: &str, secure: bool) -> Result<String, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("missing address"));
    }

    let (hostname, port) = split_host_port(authority).map_err(invalid)?;
    if hostname.is_empty() {
        return Err(invalid("missing address"));
    }

    let port = port.unwrap_or(if secure { DOCKER_TLS_PORT } else { DOCKER_PORT });
    if hostname.contains(':') {
        Ok(format!("[{}]:{}", hostname, port))
    } else {
        Ok(format!("{}:{}", hostname, port))
    }
}

/// Split `host[:port]` or `[v6][:port]`; the port is `None` only when absent
fn split_host_port(authority: &str) -> Result<(&str, Option<u16>), &'static str> {
    let parse_port = |p: &str| p.parse::<u16>().map_err(|_| "invalid port");

    if let Some(bracketed) = authority.strip_prefix('[') {
        let (h, tail) = bracketed
            .split_once(']')
            .ok_or("unterminated IPv6 literal")?;
        return match tail.strip_prefix(':') {
            Some(p) => Ok((h, Some(parse_port(p)?))),
            None if tail.is_empty() => Ok((h, None)),
            None => Err("unexpected text after IPv6 literal"),
        };
    }

    match authority.rsplit_once(':') {
        Some((h, p)) => Ok((h, Some(parse_port(p)?))),
        None => Ok((authority, None)),
    }
}

fn parse_ssh(host: &str, rest: &str, opts: &[String]) -> Result<SshTarget, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    };

    let authority = rest.split('/').next().unwrap_or_default();
    let (user, host_port) = match authority.rsplit_once('@') {
        Some((user, hp)) if !user.is_empty() => (Some(user.to_string()), hp),
        Some(_) => return Err(invalid("empty ssh user")),
        None => (None, authority),
    };

    let (hostname, port) = split_host_port(host_port).map_err(|reason| match reason {
        "invalid port" => invalid("invalid ssh port"),
        other => invalid(other),
    })?;

    if hostname.is_empty() {
        return Err(invalid("missing ssh hostname"));
    }
    // ssh would read these as options
    if hostname.starts_with('-') || user.as_deref().is_some_and(|u| u.starts_with('-')) {
        return Err(TransportError::SshSetup(format!(
            "refusing ssh destination {} that starts with '-'",
            host
        )));
    }

    Ok(SshTarget {
        user,
        host: hostname.to_string(),
        port,
        opts: opts.to_vec(),
    })
}
