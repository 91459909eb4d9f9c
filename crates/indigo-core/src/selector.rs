//! Device/property selection for `getProperties`-style re-enumeration
//! requests. The wire dialects allow omitting either field to mean "all".

#[derive(Debug, Clone, Default)]
pub struct Selector {
    pub device: Option<String>,
    pub property: Option<String>,
}

impl Selector {
    pub fn all() -> Selector {
        Selector::default()
    }

    pub fn matches_device(&self, device: &str) -> bool {
        self.device.as_deref().map(|d| d == device).unwrap_or(true)
    }

    pub fn matches(&self, device: &str, property: &str) -> bool {
        self.matches_device(device) && self.property.as_deref().map(|p| p == property).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selector_matches_everything() {
        let selector = Selector::all();
        assert!(selector.matches("mount", "MOUNT_PARK"));
    }

    #[test]
    fn device_only_selector_ignores_property() {
        let selector = Selector {
            device: Some("mount".into()),
            property: None,
        };
        assert!(selector.matches("mount", "MOUNT_PARK"));
        assert!(!selector.matches("ccd", "CCD_EXPOSURE"));
    }

    #[test]
    fn fully_qualified_selector_matches_one_property() {
        let selector = Selector {
            device: Some("mount".into()),
            property: Some("MOUNT_PARK".into()),
        };
        assert!(selector.matches("mount", "MOUNT_PARK"));
        assert!(!selector.matches("mount", "MOUNT_SLEW"));
    }
}
