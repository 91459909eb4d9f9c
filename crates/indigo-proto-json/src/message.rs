use indigo_core::{BlobMode, Perm, PropertyKind, PropertyState, SwitchRule};

#[derive(Debug, Clone)]
pub struct RawItem {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct DefOrSetVector {
    pub kind: PropertyKind,
    pub device: String,
    pub name: String,
    pub group: Option<String>,
    pub label: Option<String>,
    pub state: Option<PropertyState>,
    pub perm: Option<Perm>,
    pub rule: Option<SwitchRule>,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone)]
pub enum InboundMessage {
    GetProperties {
        device: Option<String>,
        property: Option<String>,
    },
    NewVector(DefOrSetVector),
    EnableBlob {
        device: String,
        property: Option<String>,
        mode: BlobMode,
    },
}

#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Def(DefOrSetVector),
    Set(DefOrSetVector),
    DelProperty { device: String, property: Option<String> },
    Message { device: Option<String>, text: String },
}
