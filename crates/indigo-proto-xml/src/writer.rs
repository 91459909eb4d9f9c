//! Pretty-printing serializer for the outbound half of the dialect.

use std::io::{self, Write};

use indigo_core::{Perm, PropertyKind, PropertyState, SwitchRule};

use crate::message::{DefOrSetVector, OutboundMessage};
use crate::translate::kind_suffix;

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn state_str(state: PropertyState) -> &'static str {
    match state {
        PropertyState::Idle => "Idle",
        PropertyState::Ok => "Ok",
        PropertyState::Busy => "Busy",
        PropertyState::Alert => "Alert",
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
        SwitchRule::OneOfMany => "OneOfMany",
        SwitchRule::AtMostOne => "AtMostOne",
        SwitchRule::AnyOfMany => "AnyOfMany",
    }
}

pub fn write_outbound<W: Write>(out: &mut W, message: &OutboundMessage) -> io::Result<()> {
    match message {
        OutboundMessage::Def(vector) => write_vector(out, "def", vector),
        OutboundMessage::Set(vector) => write_vector(out, "set", vector),
        OutboundMessage::DelProperty { device, property } => {
            write!(out, "<delProperty device=\"{}\"", escape(device))?;
            if let Some(name) = property {
                write!(out, " name=\"{}\"", escape(name))?;
            }
            writeln!(out, "/>")
        }
        OutboundMessage::Message { device, text } => {
            write!(out, "<message")?;
            if let Some(device) = device {
                write!(out, " device=\"{}\"", escape(device))?;
            }
            writeln!(out, " message=\"{}\"/>", escape(text))
        }
    }
}

fn write_vector<W: Write>(out: &mut W, verb: &str, vector: &DefOrSetVector) -> io::Result<()> {
    let suffix = kind_suffix(vector.kind);
    write!(out, "<{verb}{suffix}Vector device=\"{}\" name=\"{}\"", escape(&vector.device), escape(&vector.name))?;
    if let Some(group) = &vector.group {
        write!(out, " group=\"{}\"", escape(group))?;
    }
    if let Some(label) = &vector.label {
        write!(out, " label=\"{}\"", escape(label))?;
    }
    if let Some(state) = vector.state {
        write!(out, " state=\"{}\"", state_str(state))?;
    }
    if let Some(perm) = vector.perm {
        write!(out, " perm=\"{}\"", perm_str(perm))?;
    }
    if let Some(rule) = vector.rule {
        write!(out, " rule=\"{}\"", rule_str(rule))?;
    }
    writeln!(out, ">")?;
    // Item elements are always `one<Kind>`, regardless of whether the
    // enclosing vector is a `def` or a `set`.
    let item_tag = format!("one{suffix}");
    for item in &vector.items {
        write!(out, "  <{item_tag} name=\"{}\"", escape(&item.name))?;
        if let Some(label) = &item.label {
            write!(out, " label=\"{}\"", escape(label))?;
        }
        if let Some(size) = item.blob_size {
            write!(out, " size=\"{size}\"")?;
        }
        if let Some(format) = &item.blob_format {
            write!(out, " format=\"{}\"", escape(format))?;
        }
        write!(out, ">")?;
        if vector.kind == PropertyKind::Blob {
            writeln!(out)?;
            write_base64_lines(out, &item.text)?;
        } else {
            write!(out, "{}", escape(&item.text))?;
        }
        writeln!(out, "</{item_tag}>")?;
    }
    writeln!(out, "</{verb}{suffix}Vector>")
}

/// Wraps base64 (or any ASCII BLOB payload text) at 72 columns, one line per
/// chunk, matching the legacy dialect's inline BLOB transfer format.
fn write_base64_lines<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    for chunk in text.as_bytes().chunks(72) {
        out.write_all(chunk)?;
        writeln!(out)?;
    }
    Ok(())
}
