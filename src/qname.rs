//! Prefixed-name resolution against in-scope namespace bindings.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QName {
    /// The name as written in the document, e.g. `us-gaap:Revenues`
    pub qname: String,
    /// Empty when the prefix has no binding in scope
    pub namespace: String,
    pub local_name: CompactString,
    pub prefix: Option<CompactString>,
}

impl QName {
    /// Split `prefix:local` on the first colon without resolving anything.
    pub fn split(qname: &str) -> (Option<&str>, &str) {
        match qname.split_once(':') {
            Some((prefix, local)) => (Some(prefix), local),
            None => (None, qname),
        }
    }

    /// Resolve `qname` using the namespace bindings visible from `node`
    /// (its own declarations and those of every ancestor). An unprefixed name
    /// resolves against the default namespace.
    pub fn resolve(node: roxmltree::Node<'_, '_>, qname: &str) -> Self {
        let qname = qname.trim();
        let (prefix, local) = Self::split(qname);
        let namespace = node.lookup_namespace_uri(prefix).unwrap_or_default();

        Self {
            qname: qname.to_string(),
            namespace: namespace.to_string(),
            local_name: CompactString::from(local),
            prefix: prefix.map(CompactString::from),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qname)
    }
}
