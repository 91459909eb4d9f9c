//! The property/item data model (see module docs in `crate::bus` for how
//! properties flow through the bus).

use std::fmt;

/// Hard ceiling on items per property: the wire dialects size their on-stack
/// scratch buffers against this.
pub const MAX_ITEMS: usize = 128;
pub const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRule {
    OneOfMany,
    AtMostOne,
    AnyOfMany,
}

/// Wire dialect a property was defined under. Legacy 1.7 clients never see
/// 2.0-only attributes (e.g. `PERM="wo"`); the adapters consult this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Legacy17,
    Current20,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Text(String),
    Number {
        min: f64,
        max: f64,
        step: f64,
        format: String,
        /// Client's requested value.
        target: f64,
        /// Device's reported truth.
        value: f64,
    },
    Switch(bool),
    Light(PropertyState),
    Blob {
        format: String,
        size: usize,
    },
}

impl ItemValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            ItemValue::Text(_) => PropertyKind::Text,
            ItemValue::Number { .. } => PropertyKind::Number,
            ItemValue::Switch(_) => PropertyKind::Switch,
            ItemValue::Light(_) => PropertyKind::Light,
            ItemValue::Blob { .. } => PropertyKind::Blob,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub label: String,
    pub value: ItemValue,
}

impl Item {
    pub fn new(name: impl Into<String>, label: impl Into<String>, value: ItemValue) -> Item {
        Item {
            name: name.into(),
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum PropertyError {
    TooManyItems,
    NameTooLong,
    NoItems,
    MixedKinds,
    UnknownItem(String),
    WrongKind,
    Reshaped,
    RuleViolation,
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A named, typed vector of items owned by one device.
///
/// Item count, names, kind and switch rule are fixed once `Property::new`
/// succeeds; only `items[].value`, `state` and `label` may subsequently
/// change (see `apply_update`).
#[derive(Debug, Clone)]
pub struct Property {
    pub device: String,
    pub name: String,
    pub group: String,
    pub label: String,
    pub kind: PropertyKind,
    pub state: PropertyState,
    pub perm: Perm,
    pub rule: Option<SwitchRule>,
    pub version: ProtocolVersion,
    pub hidden: bool,
    items: Vec<Item>,
}

impl Property {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device: impl Into<String>,
        name: impl Into<String>,
        group: impl Into<String>,
        label: impl Into<String>,
        state: PropertyState,
        perm: Perm,
        rule: Option<SwitchRule>,
        version: ProtocolVersion,
        items: Vec<Item>,
    ) -> Result<Property, PropertyError> {
        let name = name.into();
        if name.len() > MAX_NAME_LEN {
            return Err(PropertyError::NameTooLong);
        }
        if items.is_empty() {
            return Err(PropertyError::NoItems);
        }
        if items.len() > MAX_ITEMS {
            return Err(PropertyError::TooManyItems);
        }
        let kind = items[0].value.kind();
        if items.iter().any(|item| item.value.kind() != kind) {
            return Err(PropertyError::MixedKinds);
        }
        if rule.is_some() && kind != PropertyKind::Switch {
            return Err(PropertyError::WrongKind);
        }
        Ok(Property {
            device: device.into(),
            name,
            group: group.into(),
            label: label.into(),
            kind,
            state,
            perm,
            rule,
            version,
            hidden: false,
            items,
        })
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn key(&self) -> (&str, &str) {
        (self.device.as_str(), self.name.as_str())
    }

    pub fn find_item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn find_item_mut(&mut self, name: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.name == name)
    }

    /// Whether `other` defines the exact same shape as `self`: same kind,
    /// same item names in the same order, same rule and perm. This is the
    /// check invariant 4 in the spec boils down to.
    pub fn same_shape(&self, other: &Property) -> bool {
        self.kind == other.kind
            && self.rule == other.rule
            && self.perm == other.perm
            && self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.name == b.name)
    }

    /// Applies a device- or client-originated update, enforcing invariant 4:
    /// the replacement must be the same shape, only values/state/label may
    /// move.
    pub fn apply_update(&mut self, replacement: Property) -> Result<(), PropertyError> {
        if !self.same_shape(&replacement) {
            return Err(PropertyError::Reshaped);
        }
        self.state = replacement.state;
        self.label = replacement.label;
        self.items = replacement.items;
        Ok(())
    }

    /// Sets a switch item, enforcing the property's exclusivity rule across
    /// the whole vector before accepting the change. Matches the contract
    /// that `OneOfMany`/`AtMostOne` violations are rejected before the owning
    /// device ever observes a `change_property` call.
    pub fn set_switches(&mut self, requested: &[(String, bool)]) -> Result<(), PropertyError> {
        if self.kind != PropertyKind::Switch {
            return Err(PropertyError::WrongKind);
        }
        for (name, _) in requested {
            if self.find_item(name).is_none() {
                return Err(PropertyError::UnknownItem(name.clone()));
            }
        }
        let mut on_count = 0usize;
        for item in &self.items {
            let on = requested
                .iter()
                .find(|(name, _)| name == &item.name)
                .map(|(_, value)| *value)
                .unwrap_or(matches!(item.value, ItemValue::Switch(true)));
            if on {
                on_count += 1;
            }
        }
        match self.rule {
            Some(SwitchRule::OneOfMany) if on_count != 1 => return Err(PropertyError::RuleViolation),
            Some(SwitchRule::AtMostOne) if on_count > 1 => return Err(PropertyError::RuleViolation),
            _ => {}
        }
        for (name, value) in requested {
            if let Some(item) = self.find_item_mut(name) {
                item.value = ItemValue::Switch(*value);
            }
        }
        Ok(())
    }

    /// Clamps a client's requested number values to each item's declared
    /// `[min, max]` and, when `step > 0`, snaps to the nearest multiple of
    /// `step` measured from `min`, then stores the result into the item's
    /// `target` (the device's own `value` is left untouched until the
    /// device itself reports a new reading).
    pub fn set_numbers(&mut self, requested: &[(String, f64)]) -> Result<(), PropertyError> {
        if self.kind != PropertyKind::Number {
            return Err(PropertyError::WrongKind);
        }
        for (name, _) in requested {
            if self.find_item(name).is_none() {
                return Err(PropertyError::UnknownItem(name.clone()));
            }
        }
        for (name, requested_value) in requested {
            if let Some(item) = self.find_item_mut(name) {
                if let ItemValue::Number { min, max, step, target, .. } = &mut item.value {
                    let mut snapped = requested_value.clamp(*min, *max);
                    if *step > 0.0 {
                        let steps = ((snapped - *min) / *step).round();
                        snapped = (*min + steps * *step).clamp(*min, *max);
                    }
                    *target = snapped;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch_property(rule: SwitchRule) -> Property {
        Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            Some(rule),
            ProtocolVersion::Current20,
            vec![
                Item::new("PARKED", "Parked", ItemValue::Switch(false)),
                Item::new("UNPARKED", "Unparked", ItemValue::Switch(true)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_items() {
        let err = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            None,
            ProtocolVersion::Current20,
            vec![],
        )
        .unwrap_err();
        assert_eq!(err, PropertyError::NoItems);
    }

    #[test]
    fn rejects_mixed_item_kinds() {
        let err = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            None,
            ProtocolVersion::Current20,
            vec![
                Item::new("A", "A", ItemValue::Switch(true)),
                Item::new("B", "B", ItemValue::Text("x".into())),
            ],
        )
        .unwrap_err();
        assert_eq!(err, PropertyError::MixedKinds);
    }

    #[test]
    fn one_of_many_requires_exactly_one_on() {
        let mut property = switch_property(SwitchRule::OneOfMany);
        let err = property
            .set_switches(&[("PARKED".into(), false), ("UNPARKED".into(), false)])
            .unwrap_err();
        assert_eq!(err, PropertyError::RuleViolation);
    }

    #[test]
    fn one_of_many_accepts_single_on() {
        let mut property = switch_property(SwitchRule::OneOfMany);
        property
            .set_switches(&[("PARKED".into(), true), ("UNPARKED".into(), false)])
            .unwrap();
        assert_eq!(property.find_item("PARKED").unwrap().value, ItemValue::Switch(true));
        assert_eq!(property.find_item("UNPARKED").unwrap().value, ItemValue::Switch(false));
    }

    fn number_property() -> Property {
        Property::new(
            "focuser",
            "FOCUS_POSITION",
            "Main",
            "Position",
            PropertyState::Ok,
            Perm::ReadWrite,
            None,
            ProtocolVersion::Current20,
            vec![Item::new(
                "POSITION",
                "Position",
                ItemValue::Number {
                    min: 0.0,
                    max: 100.0,
                    step: 5.0,
                    format: "%g".into(),
                    target: 0.0,
                    value: 0.0,
                },
            )],
        )
        .unwrap()
    }

    #[test]
    fn set_numbers_clamps_to_bounds() {
        let mut property = number_property();
        property.set_numbers(&[("POSITION".into(), 500.0)]).unwrap();
        let ItemValue::Number { target, .. } = property.find_item("POSITION").unwrap().value else {
            panic!("wrong item kind");
        };
        assert_eq!(target, 100.0);
    }

    #[test]
    fn set_numbers_snaps_to_nearest_step_from_min() {
        let mut property = number_property();
        property.set_numbers(&[("POSITION".into(), 23.0)]).unwrap();
        let ItemValue::Number { target, .. } = property.find_item("POSITION").unwrap().value else {
            panic!("wrong item kind");
        };
        assert_eq!(target, 25.0);
    }

    #[test]
    fn set_numbers_rejects_unknown_item() {
        let mut property = number_property();
        let err = property.set_numbers(&[("BOGUS".into(), 1.0)]).unwrap_err();
        assert_eq!(err, PropertyError::UnknownItem("BOGUS".into()));
    }

    #[test]
    fn update_cannot_reshape_property() {
        let mut property = switch_property(SwitchRule::OneOfMany);
        let reshaped = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Ok,
            Perm::ReadWrite,
            Some(SwitchRule::OneOfMany),
            ProtocolVersion::Current20,
            vec![Item::new("PARKED", "Parked", ItemValue::Switch(true))],
        )
        .unwrap();
        let err = property.apply_update(reshaped).unwrap_err();
        assert_eq!(err, PropertyError::Reshaped);
    }

    #[test]
    fn update_same_shape_succeeds() {
        let mut property = switch_property(SwitchRule::OneOfMany);
        let replacement = Property::new(
            "mount",
            "MOUNT_PARK",
            "Main",
            "Park",
            PropertyState::Busy,
            Perm::ReadWrite,
            Some(SwitchRule::OneOfMany),
            ProtocolVersion::Current20,
            vec![
                Item::new("PARKED", "Parked", ItemValue::Switch(true)),
                Item::new("UNPARKED", "Unparked", ItemValue::Switch(false)),
            ],
        )
        .unwrap();
        property.apply_update(replacement).unwrap();
        assert_eq!(property.state, PropertyState::Busy);
    }
}
