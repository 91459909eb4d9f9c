//! Static resource table for bundled management-UI assets, matching the
//! original system's `struct resource` linked list: a small ordered list of
//! path/content-type/bytes entries, matched by the longest registered prefix
//! of the request path.

pub struct Resource {
    pub path: &'static str,
    pub content_type: &'static str,
    pub bytes: &'static [u8],
}

#[derive(Default)]
pub struct ResourceTable {
    resources: Vec<Resource>,
}

impl ResourceTable {
    pub fn new() -> ResourceTable {
        ResourceTable::default()
    }

    pub fn register(&mut self, path: &'static str, content_type: &'static str, bytes: &'static [u8]) {
        self.resources.push(Resource { path, content_type, bytes });
    }

    /// Longest-prefix match against the registered table, mirroring the
    /// original server's linear scan over `struct resource`.
    pub fn find(&self, request_path: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .filter(|r| request_path.starts_with(r.path))
            .max_by_key(|r| r.path.len())
    }
}
