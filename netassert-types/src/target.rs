//! Target identity.
//!
//! A target is one independently testable unit: a host, or a pod selector
//! inside a cluster namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TargetError;

/// Namespace used when a cluster identifier carries none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The two dispatch classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetClass {
    /// A machine reached directly (local or over a remote shell).
    Host,
    /// A pod selected from a cluster deployment.
    Pod,
}

impl TargetClass {
    /// Both classes, in dispatch order.
    pub const ALL: [TargetClass; 2] = [TargetClass::Host, TargetClass::Pod];

    /// Short stable name, used in sink file names and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetClass::Host => "host",
            TargetClass::Pod => "pod",
        }
    }

    /// Parse the short name back.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "host" => Some(TargetClass::Host),
            "pod" => Some(TargetClass::Pod),
            _ => None,
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One test target: a class plus the identifier exactly as written in the
/// configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Target {
    class: TargetClass,
    id: String,
}

impl Target {
    /// Create a target.
    pub fn new(class: TargetClass, id: impl Into<String>) -> Self {
        Self {
            class,
            id: id.into(),
        }
    }

    /// Create a host target.
    pub fn host(id: impl Into<String>) -> Self {
        Self::new(TargetClass::Host, id)
    }

    /// Create a cluster pod target.
    pub fn pod(id: impl Into<String>) -> Self {
        Self::new(TargetClass::Pod, id)
    }

    /// The dispatch class.
    pub fn class(&self) -> TargetClass {
        self.class
    }

    /// The identifier as written in the document.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True for host targets that run on the dispatching machine itself.
    pub fn is_local(&self) -> bool {
        self.class == TargetClass::Host && matches!(self.id.as_str(), "localhost" | "127.0.0.1")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, self.id)
    }
}

/// A cluster identifier split into namespace and pod selector.
///
/// Accepts `namespace:selector` or a bare `selector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    /// Kubernetes namespace.
    pub namespace: String,
    /// Pod selector: a label selector when it contains `=`, otherwise a
    /// pod name or deployment-name prefix.
    pub selector: String,
}

impl PodRef {
    /// Split a cluster identifier.
    pub fn parse(id: &str) -> Result<Self, TargetError> {
        let (namespace, selector) = match id.split_once(':') {
            Some((ns, sel)) => (ns.trim(), sel.trim()),
            None => (DEFAULT_NAMESPACE, id.trim()),
        };

        if selector.is_empty() {
            return Err(TargetError::ConfigExtraction {
                target: id.to_string(),
                reason: "empty pod selector".into(),
            });
        }

        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };

        Ok(Self {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        })
    }

    /// True when the selector is a label selector (`app=web,tier=front`).
    pub fn is_label_selector(&self) -> bool {
        self.selector.contains('=')
    }

    /// Does a pod name satisfy a name-style selector?
    ///
    /// Exact match, or `<selector>-...` as produced by deployments and
    /// replica sets.
    pub fn matches_name(&self, pod_name: &str) -> bool {
        pod_name == self.selector
            || pod_name
                .strip_prefix(self.selector.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.selector)
    }
}

/// A host identifier split into optional user and address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRef {
    /// Login user embedded as `user@host`, if any.
    pub user: Option<String>,
    /// Hostname or address.
    pub host: String,
}

impl HostRef {
    /// Split a host identifier.
    pub fn parse(id: &str) -> Result<Self, TargetError> {
        let (user, host) = match id.rsplit_once('@') {
            Some((u, h)) if !u.is_empty() => (Some(u.to_string()), h),
            Some((_, h)) => (None, h),
            None => (None, id),
        };

        if host.trim().is_empty() {
            return Err(TargetError::ConfigExtraction {
                target: id.to_string(),
                reason: "empty host name".into(),
            });
        }

        Ok(Self {
            user,
            host: host.trim().to_string(),
        })
    }

    /// `user@host` if a user is known (embedded wins over the fallback).
    pub fn destination(&self, fallback_user: Option<&str>) -> String {
        match self.user.as_deref().or(fallback_user) {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}
