//! Network namespaces
//!
//! Which namespaces exist, which endpoint lives in each, and the primitive
//! that moves the calling thread into one. Discovery is left to the
//! deployment: the agent only consumes a [`NamespaceProvider`].

pub mod nsenter;
pub mod provider;

pub use nsenter::enter_net_namespace;
pub use provider::{NamespaceProvider, StaticTopology};

use regex::Regex;
use std::sync::OnceLock;

/// Registry key of workers running in the agent's own namespace.
pub const ROOT_NAMESPACE: &str = "root";

/// Whether `name` is safe to use as a file name under the netns directory.
pub fn is_valid_namespace_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid namespace pattern"));
    pattern.is_match(name) && name != "." && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_names() {
        assert!(is_valid_namespace_name("red"));
        assert!(is_valid_namespace_name("ns-1.blue_2"));
        assert!(!is_valid_namespace_name(""));
        assert!(!is_valid_namespace_name(".."));
        assert!(!is_valid_namespace_name("../etc"));
        assert!(!is_valid_namespace_name("a b"));
    }
}
