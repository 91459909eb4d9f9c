use indexmap::IndexMap;

use indigo_core::{BlobMode, Item, ItemValue, Perm, Property, PropertyChange, PropertyKind, PropertyState, SwitchRule};
use indigo_support::error::{ErrorKind, NetworkError, NetworkResult};

use crate::message::{DefOrSetVector, InboundMessage, RawItem};
use crate::value::JsonValue;

pub fn kind_suffix(kind: PropertyKind) -> &'static str {
    match kind {
        PropertyKind::Text => "Text",
        PropertyKind::Number => "Number",
        PropertyKind::Switch => "Switch",
        PropertyKind::Light => "Light",
        PropertyKind::Blob => "BLOB",
    }
}

fn kind_from_key(key: &str, verb: &str) -> Option<PropertyKind> {
    for (prefix, kind) in [
        ("Text", PropertyKind::Text),
        ("Number", PropertyKind::Number),
        ("Switch", PropertyKind::Switch),
        ("Light", PropertyKind::Light),
        ("BLOB", PropertyKind::Blob),
    ] {
        if key == format!("{verb}{prefix}Vector") {
            return Some(kind);
        }
    }
    None
}

/// The JSON dialect spells states/rules lower-case, unlike the XML dialect's
/// `CamelCase` attribute values; this is the one casing difference between
/// the two wire encodings for otherwise identical information.
fn parse_state(raw: &str) -> Option<PropertyState> {
    match raw {
        "idle" => Some(PropertyState::Idle),
        "ok" => Some(PropertyState::Ok),
        "busy" => Some(PropertyState::Busy),
        "alert" => Some(PropertyState::Alert),
        _ => None,
    }
}

fn parse_perm(raw: &str) -> Option<Perm> {
    match raw {
        "ro" => Some(Perm::ReadOnly),
        "wo" => Some(Perm::WriteOnly),
        "rw" => Some(Perm::ReadWrite),
        _ => None,
    }
}

fn parse_rule(raw: &str) -> Option<SwitchRule> {
    match raw {
        "oneofmany" => Some(SwitchRule::OneOfMany),
        "atmostone" => Some(SwitchRule::AtMostOne),
        "anyofmany" => Some(SwitchRule::AnyOfMany),
        _ => None,
    }
}

pub fn value_to_inbound(value: &JsonValue) -> NetworkResult<InboundMessage> {
    let object = value.as_object().ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?;
    let (key, body) = object.iter().next().ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?;

    if key == "getProperties" {
        return Ok(InboundMessage::GetProperties {
            device: body.get("device").and_then(JsonValue::as_str).map(str::to_string),
            property: body.get("name").and_then(JsonValue::as_str).map(str::to_string),
        });
    }
    if key == "enableBLOB" {
        let mode = match body.get("value").and_then(JsonValue::as_str) {
            Some("Never") => BlobMode::Never,
            Some("Also") => BlobMode::Also,
            Some("Only") => BlobMode::Only,
            Some("URL") => BlobMode::Url,
            _ => return Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
        };
        let device = body
            .get("device")
            .and_then(JsonValue::as_str)
            .ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?
            .to_string();
        return Ok(InboundMessage::EnableBlob {
            device,
            property: body.get("name").and_then(JsonValue::as_str).map(str::to_string),
            mode,
        });
    }
    if let Some(kind) = kind_from_key(key, "new") {
        return Ok(InboundMessage::NewVector(value_to_vector(body, kind)?));
    }
    Err(NetworkError::Fatal(ErrorKind::MalformedMessage))
}

fn value_to_vector(body: &JsonValue, kind: PropertyKind) -> NetworkResult<DefOrSetVector> {
    let device = body
        .get("device")
        .and_then(JsonValue::as_str)
        .ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?
        .to_string();
    let name = body
        .get("name")
        .and_then(JsonValue::as_str)
        .ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?
        .to_string();
    let items = body
        .get("items")
        .and_then(JsonValue::as_array)
        .unwrap_or(&[])
        .iter()
        .map(|item| RawItem {
            name: item.get("name").and_then(JsonValue::as_str).unwrap_or_default().to_string(),
            text: item_value_to_text(item.get("value").unwrap_or(&JsonValue::Null)),
        })
        .collect();
    Ok(DefOrSetVector {
        kind,
        device,
        name,
        group: body.get("group").and_then(JsonValue::as_str).map(str::to_string),
        label: body.get("label").and_then(JsonValue::as_str).map(str::to_string),
        state: body.get("state").and_then(JsonValue::as_str).and_then(parse_state),
        perm: body.get("perm").and_then(JsonValue::as_str).and_then(parse_perm),
        rule: body.get("rule").and_then(JsonValue::as_str).and_then(parse_rule),
        items,
    })
}

fn item_value_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Bool(b) => if *b { "On" } else { "Off" }.to_string(),
        JsonValue::Number(n) => format!("{n}"),
        JsonValue::String(s) => s.clone(),
        _ => String::new(),
    }
}

pub fn vector_to_change(vector: &DefOrSetVector) -> PropertyChange {
    let mut change = PropertyChange {
        property: vector.name.clone(),
        text_items: Vec::new(),
        number_items: Vec::new(),
        switch_items: Vec::new(),
    };
    for item in &vector.items {
        match vector.kind {
            PropertyKind::Text => change.text_items.push((item.name.clone(), item.text.clone())),
            PropertyKind::Number => {
                if let Ok(value) = item.text.trim().parse::<f64>() {
                    change.number_items.push((item.name.clone(), value));
                }
            }
            PropertyKind::Switch => change.switch_items.push((item.name.clone(), item.text.trim() == "On")),
            _ => {}
        }
    }
    change
}

pub fn property_to_vector(property: &Property) -> DefOrSetVector {
    let items = property
        .items()
        .iter()
        .map(|item| RawItem {
            name: item.name.clone(),
            text: item_text(&item.value),
        })
        .collect();
    DefOrSetVector {
        kind: property.kind,
        device: property.device.clone(),
        name: property.name.clone(),
        group: Some(property.group.clone()),
        label: Some(property.label.clone()),
        state: Some(property.state),
        perm: Some(property.perm),
        rule: property.rule,
        items,
    }
}

fn item_text(value: &ItemValue) -> String {
    match value {
        ItemValue::Text(s) => s.clone(),
        ItemValue::Number { value, .. } => format!("{value}"),
        ItemValue::Switch(on) => if *on { "On" } else { "Off" }.to_string(),
        ItemValue::Light(state) => state.to_string(),
        ItemValue::Blob { format, size } => format!("{format};{size}"),
    }
}

pub fn vector_to_value(verb: &str, vector: &DefOrSetVector) -> JsonValue {
    let mut body = IndexMap::new();
    body.insert("device".to_string(), JsonValue::String(vector.device.clone()));
    body.insert("name".to_string(), JsonValue::String(vector.name.clone()));
    if let Some(group) = &vector.group {
        body.insert("group".to_string(), JsonValue::String(group.clone()));
    }
    if let Some(label) = &vector.label {
        body.insert("label".to_string(), JsonValue::String(label.clone()));
    }
    if let Some(state) = vector.state {
        body.insert("state".to_string(), JsonValue::String(state_str(state).to_string()));
    }
    if let Some(perm) = vector.perm {
        body.insert("perm".to_string(), JsonValue::String(perm_str(perm).to_string()));
    }
    if let Some(rule) = vector.rule {
        body.insert("rule".to_string(), JsonValue::String(rule_str(rule).to_string()));
    }
    let items = vector
        .items
        .iter()
        .map(|item| {
            let mut map = IndexMap::new();
            map.insert("name".to_string(), JsonValue::String(item.name.clone()));
            map.insert("value".to_string(), item_text_to_value(vector.kind, &item.text));
            JsonValue::Object(map)
        })
        .collect();
    body.insert("items".to_string(), JsonValue::Array(items));

    let mut top = IndexMap::new();
    top.insert(format!("{verb}{}Vector", kind_suffix(vector.kind)), JsonValue::Object(body));
    JsonValue::Object(top)
}

fn item_text_to_value(kind: PropertyKind, text: &str) -> JsonValue {
    match kind {
        PropertyKind::Switch => JsonValue::Bool(text == "On"),
        PropertyKind::Number => text.parse::<f64>().map(JsonValue::Number).unwrap_or(JsonValue::Null),
        _ => JsonValue::String(text.to_string()),
    }
}

fn state_str(state: PropertyState) -> &'static str {
    match state {
        PropertyState::Idle => "idle",
        PropertyState::Ok => "ok",
        PropertyState::Busy => "busy",
        PropertyState::Alert => "alert",
    }
}

fn perm_str(perm: Perm) -> &'static str {
    match perm {
        Perm::ReadOnly => "ro",
        Perm::WriteOnly => "wo",
        Perm::ReadWrite => "rw",
    }
}

fn rule_str(rule: SwitchRule) -> &'static str {
    match rule {
        SwitchRule::OneOfMany => "oneofmany",
        SwitchRule::AtMostOne => "atmostone",
        SwitchRule::AnyOfMany => "anyofmany",
    }
}

pub fn del_property_to_value(device: &str, property: Option<&str>) -> JsonValue {
    let mut body = IndexMap::new();
    body.insert("device".to_string(), JsonValue::String(device.to_string()));
    if let Some(name) = property {
        body.insert("name".to_string(), JsonValue::String(name.to_string()));
    }
    let mut top = IndexMap::new();
    top.insert("deleteProperty".to_string(), JsonValue::Object(body));
    JsonValue::Object(top)
}

pub fn message_to_value(device: Option<&str>, text: &str) -> JsonValue {
    let mut body = IndexMap::new();
    if let Some(device) = device {
        body.insert("device".to_string(), JsonValue::String(device.to_string()));
    }
    body.insert("message".to_string(), JsonValue::String(text.to_string()));
    let mut top = IndexMap::new();
    top.insert("message".to_string(), JsonValue::Object(body));
    JsonValue::Object(top)
}
