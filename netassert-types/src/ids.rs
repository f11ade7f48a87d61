//! Names for ephemeral containers and result sinks.

use std::fmt;

use crate::{Target, TargetClass};

/// Base name for ephemeral test containers.
pub const DEFAULT_CONTAINER_PREFIX: &str = "netassert";

/// Suffix of a committed result sink.
const SINK_EXTENSION: &str = ".tap";

/// Process-unique name of an ephemeral test container.
///
/// `<prefix>-<8 hex chars>`, random per container.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContainerName(String);

impl ContainerName {
    /// Generate a fresh name with the given prefix.
    pub fn generate(prefix: &str) -> Self {
        let id = uuid::Uuid::new_v4().as_simple().to_string();
        Self(format!("{}-{}", prefix, &id[..8]))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerName({})", self.0)
    }
}

/// File name of a target's result sink.
///
/// `<class>-<escaped id>.tap`. Bytes outside `[A-Za-z0-9.-]` are written as
/// `_XX`, so the mapping is reversible and two identifiers never share a
/// sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkName(String);

impl SinkName {
    /// Sink name for a target.
    pub fn for_target(target: &Target) -> Self {
        Self(format!(
            "{}-{}{}",
            target.class(),
            escape(target.id()),
            SINK_EXTENSION
        ))
    }

    /// Recover the target from a committed sink file name.
    ///
    /// Returns `None` for anything that is not a committed sink (partial
    /// files, stray files).
    pub fn parse(file_name: &str) -> Option<Target> {
        let stem = file_name.strip_suffix(SINK_EXTENSION)?;
        let (class, escaped) = stem.split_once('-')?;
        let class = TargetClass::from_str_opt(class)?;
        let id = unescape(escaped)?;
        Some(Target::new(class, id))
    }

    /// File name of the committed sink.
    pub fn file_name(&self) -> &str {
        &self.0
    }

    /// File name used while the worker is still writing.
    pub fn partial_file_name(&self) -> String {
        format!("{}.partial", self.0)
    }
}

impl fmt::Display for SinkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn escape(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push('_');
            out.push_str(&hex::encode([byte]));
        }
    }
    out
}

fn unescape(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'_' {
            let pair = escaped.get(i + 1..i + 3)?;
            out.extend(hex::decode(pair).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
