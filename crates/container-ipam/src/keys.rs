//! Store key schema
//!
//! ```text
//! <root>/networks/<subnet>/config
//! <root>/networks/<subnet>/wait                      (pool lock)
//! <root>/networks/<subnet>/pool/<address>
//! <root>/networks/<subnet>/assigned/<host>/<address>
//! <root>/pods/<container>
//! ```

use std::net::Ipv4Addr;

/// Builds keys under a configured root
#[derive(Debug, Clone)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Directory holding every subnet
    pub fn networks(&self) -> String {
        format!("{}/networks", self.root)
    }

    pub fn subnet(&self, subnet: &str) -> String {
        format!("{}/{}", self.networks(), subnet)
    }

    pub fn config(&self, subnet: &str) -> String {
        format!("{}/config", self.subnet(subnet))
    }

    pub fn lock(&self, subnet: &str) -> String {
        format!("{}/wait", self.subnet(subnet))
    }

    pub fn pool(&self, subnet: &str) -> String {
        format!("{}/pool", self.subnet(subnet))
    }

    pub fn pool_entry(&self, subnet: &str, address: Ipv4Addr) -> String {
        format!("{}/{}", self.pool(subnet), address)
    }

    /// Directory holding every host's assignments in a subnet
    pub fn assigned_root(&self, subnet: &str) -> String {
        format!("{}/assigned", self.subnet(subnet))
    }

    pub fn assigned(&self, subnet: &str, host: &str) -> String {
        format!("{}/{}", self.assigned_root(subnet), host)
    }

    pub fn assigned_entry(&self, subnet: &str, host: &str, address: Ipv4Addr) -> String {
        format!("{}/{}", self.assigned(subnet, host), address)
    }

    pub fn pods(&self) -> String {
        format!("{}/pods", self.root)
    }

    pub fn pod(&self, container: &str) -> String {
        format!("{}/{}", self.pods(), container)
    }
}

/// Last path segment of a key
pub fn last_segment(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// Host segment of an `.../assigned/<host>/<entry>` key
pub fn assignment_host(key: &str) -> Option<&str> {
    let mut segments = key.trim_end_matches('/').rsplit('/');
    let _entry = segments.next()?;
    let host = segments.next()?;
    (segments.next()? == "assigned").then_some(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("/skylark/");
        let ip = Ipv4Addr::new(10, 0, 2, 103);

        assert_eq!(keys.networks(), "/skylark/networks");
        assert_eq!(keys.config("10.0.2.0"), "/skylark/networks/10.0.2.0/config");
        assert_eq!(keys.lock("10.0.2.0"), "/skylark/networks/10.0.2.0/wait");
        assert_eq!(keys.pool_entry("10.0.2.0", ip), "/skylark/networks/10.0.2.0/pool/10.0.2.103");
        assert_eq!(
            keys.assigned_entry("10.0.2.0", "node-1", ip),
            "/skylark/networks/10.0.2.0/assigned/node-1/10.0.2.103"
        );
        assert_eq!(keys.pod("abc123"), "/skylark/pods/abc123");
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("/a/b/10.0.2.1"), "10.0.2.1");
        assert_eq!(last_segment("/a/b/"), "b");
        assert_eq!(last_segment("plain"), "plain");
    }

    #[test]
    fn test_assignment_host() {
        let keys = KeySpace::new("/skylark");
        let key = keys.assigned_entry("10.0.2.0", "node-1", Ipv4Addr::new(10, 0, 2, 1));
        assert_eq!(assignment_host(&key), Some("node-1"));
        assert_eq!(assignment_host("/skylark/networks/10.0.2.0/assigned/node-1/junk"), Some("node-1"));

        assert_eq!(assignment_host("/skylark/networks/10.0.2.0/pool/10.0.2.1"), None);
        assert_eq!(assignment_host("/skylark/networks/10.0.2.0/config"), None);
        assert_eq!(assignment_host("/x"), None);
    }
}
