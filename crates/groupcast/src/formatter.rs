//! Event name namespacing.

/// Prefix reserved for client-originated (whisper) events.
pub const CLIENT_EVENT_PREFIX: &str = "client-";

/// Maps bare event names to their namespaced wire form and back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFormatter {
    namespace: Option<String>,
}

impl EventFormatter {
    /// Create a formatter. An empty namespace disables namespacing.
    pub fn new(namespace: Option<String>) -> Self {
        Self {
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }

    /// The configured namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Replace the namespace.
    pub fn set_namespace(&mut self, namespace: Option<String>) {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
    }

    /// Format a bare event name into its wire form.
    ///
    /// A leading `.` or `\` marks an event as global and is stripped. Names
    /// that are already qualified (containing `.` or `\`) and client events
    /// pass through. Everything else gets the namespace prefix.
    ///
    /// Prefix an event with `.` or `\` to opt out of namespacing, so
    /// `.Order.Created` goes out as `Order.Created`.
    pub fn format(&self, event: &str) -> String {
        if let Some(global) = event.strip_prefix(['.', '\\']) {
            return global.to_string();
        }

        if event.contains(['.', '\\']) || event.starts_with(CLIENT_EVENT_PREFIX) {
            return event.to_string();
        }

        match &self.namespace {
            Some(namespace) => format!("{namespace}.{event}"),
            None => event.to_string(),
        }
    }

    /// Recover the display name of an inbound wire event.
    ///
    /// Events inside the namespace lose the namespace and its separator.
    /// Foreign events are marked with a leading `.`.
    pub fn display_name(&self, wire_event: &str) -> String {
        let Some(namespace) = &self.namespace else {
            return wire_event.to_string();
        };

        let escaped = namespace.replace('.', "\\");
        for prefix in [namespace.as_str(), escaped.as_str()] {
            if let Some(rest) = wire_event.strip_prefix(prefix) {
                if let Some(bare) = rest.strip_prefix(['.', '\\']) {
                    return bare.to_string();
                }
            }
        }

        format!(".{wire_event}")
    }
}
