//! Conversions between the parsed `Element` tree and the logical message set
//! in `crate::message`, and between that set and `indigo_core::Property`.

use indigo_core::{BlobMode, Item, ItemValue, Perm, Property, PropertyChange, PropertyKind, PropertyState, SwitchRule};
use indigo_support::error::{ErrorKind, NetworkError, NetworkResult};

use crate::message::{DefOrSetVector, InboundMessage, RawItem};
use crate::parser::Element;

pub fn kind_suffix(kind: PropertyKind) -> &'static str {
    match kind {
        PropertyKind::Text => "Text",
        PropertyKind::Number => "Number",
        PropertyKind::Switch => "Switch",
        PropertyKind::Light => "Light",
        PropertyKind::Blob => "BLOB",
    }
}

fn kind_from_tag(tag: &str) -> Option<(&'static str, PropertyKind)> {
    for (prefix, kind) in [
        ("Text", PropertyKind::Text),
        ("Number", PropertyKind::Number),
        ("Switch", PropertyKind::Switch),
        ("Light", PropertyKind::Light),
        ("BLOB", PropertyKind::Blob),
    ] {
        if tag.ends_with(&format!("{prefix}Vector")) {
            return Some((kind_suffix(kind), kind));
        }
    }
    None
}

fn parse_state(raw: &str) -> Option<PropertyState> {
    match raw {
        "Idle" => Some(PropertyState::Idle),
        "Ok" => Some(PropertyState::Ok),
        "Busy" => Some(PropertyState::Busy),
        "Alert" => Some(PropertyState::Alert),
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
        "OneOfMany" => Some(SwitchRule::OneOfMany),
        "AtMostOne" => Some(SwitchRule::AtMostOne),
        "AnyOfMany" => Some(SwitchRule::AnyOfMany),
        _ => None,
    }
}

pub fn element_to_inbound(element: &Element) -> NetworkResult<InboundMessage> {
    if element.name == "getProperties" {
        return Ok(InboundMessage::GetProperties {
            device: element.attr("device").map(str::to_string),
            property: element.attr("name").map(str::to_string),
            version: element.attr("version").map(str::to_string),
        });
    }
    if element.name == "enableBLOB" {
        let mode = match element.text.as_str() {
            "Never" => BlobMode::Never,
            "Also" => BlobMode::Also,
            "Only" => BlobMode::Only,
            "URL" => BlobMode::Url,
            _ => return Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
        };
        let device = element
            .attr("device")
            .ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?
            .to_string();
        return Ok(InboundMessage::EnableBlob {
            device,
            property: element.attr("name").map(str::to_string),
            mode,
        });
    }
    if let Some(stripped) = element.name.strip_prefix("new") {
        if let Some((_, kind)) = kind_from_tag(&format!("{stripped}Vector")) {
            return Ok(InboundMessage::NewVector(element_to_vector(element, kind)?));
        }
    }
    Err(NetworkError::Fatal(ErrorKind::MalformedMessage))
}

fn element_to_vector(element: &Element, kind: PropertyKind) -> NetworkResult<DefOrSetVector> {
    let device = element
        .attr("device")
        .ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?
        .to_string();
    let name = element
        .attr("name")
        .ok_or(NetworkError::Fatal(ErrorKind::MalformedMessage))?
        .to_string();
    let items = element
        .children
        .iter()
        .map(|child| RawItem {
            name: child.attr("name").unwrap_or_default().to_string(),
            label: child.attr("label").map(str::to_string),
            text: child.text.clone(),
            blob_size: child.attr("size").and_then(|s| s.parse().ok()),
            blob_format: child.attr("format").map(str::to_string),
        })
        .collect();
    Ok(DefOrSetVector {
        kind,
        device,
        name,
        group: element.attr("group").map(str::to_string),
        label: element.attr("label").map(str::to_string),
        state: element.attr("state").and_then(parse_state),
        perm: element.attr("perm").and_then(parse_perm),
        rule: element.attr("rule").and_then(parse_rule),
        items,
    })
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
                let parsed = item.text.trim().parse::<f64>().ok().or_else(|| parse_sexagesimal(&item.text));
                if let Some(value) = parsed {
                    change.number_items.push((item.name.clone(), value));
                }
            }
            PropertyKind::Switch => change
                .switch_items
                .push((item.name.clone(), item.text.trim() == "On")),
            _ => {}
        }
    }
    change
}

pub fn property_to_vector(property: &Property) -> DefOrSetVector {
    let items = property
        .items()
        .iter()
        .map(|item| {
            let (blob_size, blob_format) = match &item.value {
                ItemValue::Blob { format, size } => (Some(*size), Some(format.clone())),
                _ => (None, None),
            };
            RawItem {
                name: item.name.clone(),
                label: Some(item.label.clone()),
                text: item_text(&item.value),
                blob_size,
                blob_format,
            }
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
        ItemValue::Number { value, format, .. } => format_number(*value, format),
        ItemValue::Switch(on) => if *on { "On" } else { "Off" }.to_string(),
        ItemValue::Light(state) => state.to_string(),
        ItemValue::Blob { format, size } => format!("{format};{size}"),
    }
}

/// `%<width>.<precision>m`-style sexagesimal formats are the one quirk the
/// original dialect's `%.Nm` numeric format carries; everything else is a
/// plain `printf`-style float which Rust's formatter already handles.
fn format_number(value: f64, format: &str) -> String {
    if format.ends_with('m') {
        return format_sexagesimal(value);
    }
    format!("{value}")
}

fn format_sexagesimal(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let value = value.abs();
    let degrees = value.trunc() as i64;
    let minutes_full = (value.fract() * 60.0).abs();
    let minutes = minutes_full.trunc() as i64;
    let seconds = (minutes_full.fract() * 60.0).round() as i64;
    format!("{sign}{degrees}:{minutes:02}:{seconds:02}")
}

pub fn parse_sexagesimal(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let negative = raw.starts_with('-');
    let raw = raw.trim_start_matches('-');
    let parts: Vec<&str> = raw.split(':').collect();
    let value = match parts.as_slice() {
        [d] => d.parse::<f64>().ok()?,
        [d, m] => d.parse::<f64>().ok()? + m.parse::<f64>().ok()? / 60.0,
        [d, m, s] => d.parse::<f64>().ok()? + m.parse::<f64>().ok()? / 60.0 + s.parse::<f64>().ok()? / 3600.0,
        _ => return None,
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    #[test]
    fn get_properties_translates_selector() {
        let mut parser = Parser::new();
        parser.feed(br#"<getProperties version="2.0" device="Mount" name="MOUNT_PARK"/>"#);
        let element = parser.next_element().unwrap().unwrap();
        let message = element_to_inbound(&element).unwrap();
        match message {
            InboundMessage::GetProperties { device, property, version } => {
                assert_eq!(device.as_deref(), Some("Mount"));
                assert_eq!(property.as_deref(), Some("MOUNT_PARK"));
                assert_eq!(version.as_deref(), Some("2.0"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn new_switch_vector_translates_to_change() {
        let mut parser = Parser::new();
        parser.feed(b"<newSwitchVector device=\"Mount\" name=\"MOUNT_PARK\"><oneSwitch name=\"PARKED\">On</oneSwitch></newSwitchVector>");
        let element = parser.next_element().unwrap().unwrap();
        let message = element_to_inbound(&element).unwrap();
        match message {
            InboundMessage::NewVector(vector) => {
                let change = vector_to_change(&vector);
                assert_eq!(change.switch_items, vec![("PARKED".to_string(), true)]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn new_number_vector_accepts_sexagesimal_values() {
        let mut parser = Parser::new();
        parser.feed(b"<newNumberVector device=\"Mount\" name=\"EQUATORIAL_EOD_COORD\"><oneNumber name=\"RA\">12:30:00</oneNumber></newNumberVector>");
        let element = parser.next_element().unwrap().unwrap();
        let message = element_to_inbound(&element).unwrap();
        match message {
            InboundMessage::NewVector(vector) => {
                let change = vector_to_change(&vector);
                assert_eq!(change.number_items.len(), 1);
                assert!((change.number_items[0].1 - 12.5).abs() < 0.001);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn sexagesimal_roundtrips_through_format_and_parse() {
        let formatted = format_sexagesimal(12.5);
        let parsed = parse_sexagesimal(&formatted).unwrap();
        assert!((parsed - 12.5).abs() < 0.001);
    }

    #[test]
    fn parse_sexagesimal_rejects_garbage() {
        assert!(parse_sexagesimal("not-a-number").is_none());
    }
}
