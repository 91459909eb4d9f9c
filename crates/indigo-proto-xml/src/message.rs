//! The logical message set shared by both wire dialects (XML here, JSON in
//! `indigo-proto-json`). Each adapter only has to translate to and from this
//! set, rather than duplicating the bus-facing plumbing.

use indigo_core::{BlobMode, Perm, PropertyKind, PropertyState, SwitchRule};

#[derive(Debug, Clone)]
pub struct RawItem {
    pub name: String,
    pub label: Option<String>,
    pub text: String,
    /// `size`/`format` attributes carried by `oneBLOB`/`defBLOB` elements;
    /// `None` for every other item kind.
    pub blob_size: Option<usize>,
    pub blob_format: Option<String>,
}

impl RawItem {
    pub fn new(name: impl Into<String>, label: Option<String>, text: String) -> RawItem {
        RawItem {
            name: name.into(),
            label,
            text,
            blob_size: None,
            blob_format: None,
        }
    }
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
        /// The raw `version` attribute, if the client sent one. `None` means
        /// a client that never identifies itself (treated as current).
        version: Option<String>,
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
    DelProperty {
        device: String,
        property: Option<String>,
    },
    Message {
        device: Option<String>,
        text: String,
    },
}
