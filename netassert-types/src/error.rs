//! Target-level error taxonomy.
//!
//! Every variant here is scoped to one target: it is written into that
//! target's sink as failing output and never aborts sibling workers.

use thiserror::Error;

/// Errors that fail a single target.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The configuration has no usable entry for this target.
    #[error("no test configuration for {target}: {reason}")]
    ConfigExtraction {
        /// Target identifier.
        target: String,
        /// What was missing or malformed.
        reason: String,
    },

    /// No pod matched the selector.
    #[error("no running pod matches {selector} in namespace {namespace}")]
    TargetNotFound {
        /// Namespace searched.
        namespace: String,
        /// Selector used.
        selector: String,
    },

    /// The pod was found but its workload container is not on the node.
    #[error("no running container for pod {pod} on node {node}")]
    ContainerNotFound {
        /// Pod name.
        pod: String,
        /// Node hosting the pod.
        node: String,
    },

    /// A remote session or tool invocation could not be established.
    #[error("cannot reach {target}: {reason}")]
    Connectivity {
        /// Host, node, or API the connection was for.
        target: String,
        /// Underlying cause.
        reason: String,
    },

    /// The test container ran and exited non-zero.
    #[error("test run exited with code {exit_code}")]
    TestFailure {
        /// Exit code of the remote command or container.
        exit_code: i64,
    },

    /// The container runtime rejected an operation.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Local I/O (spawning a tool, writing the sink).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TargetError {
    /// Short stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TargetError::ConfigExtraction { .. } => "config-extraction",
            TargetError::TargetNotFound { .. } => "target-not-found",
            TargetError::ContainerNotFound { .. } => "container-not-found",
            TargetError::Connectivity { .. } => "connectivity",
            TargetError::TestFailure { .. } => "test-failure",
            TargetError::Runtime(_) => "runtime",
            TargetError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TargetError::TargetNotFound {
            namespace: "web".into(),
            selector: "frontend".into(),
        };
        assert_eq!(
            err.to_string(),
            "no running pod matches frontend in namespace web"
        );
        assert_eq!(err.kind(), "target-not-found");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TargetError>();
    }
}
