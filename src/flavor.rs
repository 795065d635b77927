//! OS flavor model for native event semantics.
//!
//! Native change notifications do not agree across operating systems. The
//! shapes this crate reproduces, per operation on a watched directory:
//!
//! | flavor        | create            | change           | mtime touch      | delete   |
//! |---------------|-------------------|------------------|------------------|----------|
//! | Linux/Windows | rename + change   | change           | change           | rename   |
//! | macOS         | rename            | rename or change | rename or change | rename   |
//!
//! macOS classification is nondeterministic across kernel versions, so
//! rename and change form one equivalence class there rather than a bug to
//! fix. Recursive subscriptions on Windows additionally report a synthetic
//! `change` on the containing directory after a create; recursive native
//! subscriptions are unsupported on the Linux flavor (they cannot span
//! symlinked subtrees) and fail at subscribe time.

use std::fmt;

/// Platform behavior class governing native event shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFlavor {
    Linux,
    Windows,
    MacOs,
}

impl OsFlavor {
    /// The flavor of the machine this process runs on.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            OsFlavor::MacOs
        } else if cfg!(windows) {
            OsFlavor::Windows
        } else {
            OsFlavor::Linux
        }
    }

    /// Whether two raw event names count as the same event on this flavor.
    ///
    /// On macOS, rename and change are interchangeable; Linux and Windows
    /// treat them as distinct and ordered.
    pub fn events_equivalent(self, a: RawEventName, b: RawEventName) -> bool {
        a == b || self == OsFlavor::MacOs
    }

    /// Whether the native backend supports recursive subscriptions.
    pub fn supports_recursive_native(self) -> bool {
        !matches!(self, OsFlavor::Linux)
    }

    /// Whether a recursive create also reports a synthetic `change` on the
    /// containing directory. Passed through to callers, never suppressed.
    pub fn reports_container_change(self) -> bool {
        matches!(self, OsFlavor::Windows)
    }
}

/// Raw native event name as the OS reports it. Untrusted and ambiguous
/// input; normalization happens in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventName {
    Rename,
    Change,
}

impl RawEventName {
    pub fn as_str(self) -> &'static str {
        match self {
            RawEventName::Rename => "rename",
            RawEventName::Change => "change",
        }
    }
}

impl fmt::Display for RawEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
