//! Component definitions and per-ghost component options.

use crate::field::FieldDef;
use crate::{ComponentId, FieldId};

/// A replicated component: an ordered list of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentDef {
    pub id: ComponentId,
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl ComponentDef {
    /// Creates a new component with no fields.
    #[must_use]
    pub fn new(id: ComponentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field to the component.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Position of `field` within the component, if present.
    #[must_use]
    pub fn field_position(&self, field: FieldId) -> Option<usize> {
        self.fields.iter().position(|f| f.id == field)
    }
}

/// Which connections receive a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SendTo {
    /// Every connection.
    #[default]
    All,
    /// Only the connection that owns the ghost.
    Owner,
    /// Every connection except the owner.
    NonOwner,
}

/// How a client simulates a ghost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Interpolated,
    Predicted,
}

/// Set of client kinds a component is sent for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClientKindMask {
    pub interpolated: bool,
    pub predicted: bool,
}

impl ClientKindMask {
    /// Sent for both interpolated and predicted clients.
    pub const ALL: Self = Self {
        interpolated: true,
        predicted: true,
    };
    /// Sent only to clients interpolating the ghost.
    pub const INTERPOLATED: Self = Self {
        interpolated: true,
        predicted: false,
    };
    /// Sent only to clients predicting the ghost.
    pub const PREDICTED: Self = Self {
        interpolated: false,
        predicted: true,
    };

    /// Returns `true` if the mask includes `kind`.
    #[must_use]
    pub const fn contains(self, kind: ClientKind) -> bool {
        match kind {
            ClientKind::Interpolated => self.interpolated,
            ClientKind::Predicted => self.predicted,
        }
    }

    pub(crate) const fn bits(self) -> u8 {
        (self.interpolated as u8) | ((self.predicted as u8) << 1)
    }
}

impl Default for ClientKindMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// A component as it appears on one ghost type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostComponentDef {
    pub component: ComponentDef,
    /// 0 for the root entity, n for the ghost's n-th child entity.
    pub entity_index: u16,
    /// Variable-length list of elements instead of a single value.
    pub buffer: bool,
    /// Carries an enable bit on the wire.
    pub enableable: bool,
    pub send_to: SendTo,
    pub send_for: ClientKindMask,
    /// Field holding the owning connection's network id.
    pub owner_field: Option<FieldId>,
}

impl GhostComponentDef {
    /// A plain root component sent to everyone.
    #[must_use]
    pub fn root(component: ComponentDef) -> Self {
        Self {
            component,
            entity_index: 0,
            buffer: false,
            enableable: false,
            send_to: SendTo::All,
            send_for: ClientKindMask::ALL,
            owner_field: None,
        }
    }

    /// A component living on child entity `entity_index`.
    #[must_use]
    pub fn child(component: ComponentDef, entity_index: u16) -> Self {
        Self {
            entity_index,
            ..Self::root(component)
        }
    }

    /// Marks the component as a buffer of elements.
    #[must_use]
    pub fn buffer(mut self) -> Self {
        self.buffer = true;
        self
    }

    /// Marks the component as enableable.
    #[must_use]
    pub fn enableable(mut self) -> Self {
        self.enableable = true;
        self
    }

    /// Restricts the component to the owner or non-owners.
    #[must_use]
    pub fn send_to(mut self, send_to: SendTo) -> Self {
        self.send_to = send_to;
        self
    }

    /// Restricts the component to some client kinds.
    #[must_use]
    pub fn send_for(mut self, mask: ClientKindMask) -> Self {
        self.send_for = mask;
        self
    }

    /// Marks `field` as the owner network id.
    #[must_use]
    pub fn owner_field(mut self, field: FieldId) -> Self {
        self.owner_field = Some(field);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldCodec;

    fn cid(value: u16) -> ComponentId {
        ComponentId::new(value).unwrap()
    }

    fn fid(value: u16) -> FieldId {
        FieldId::new(value).unwrap()
    }

    #[test]
    fn builder_sets_flags() {
        let def = GhostComponentDef::child(ComponentDef::new(cid(1), "Inventory"), 2)
            .buffer()
            .enableable()
            .send_to(SendTo::Owner)
            .send_for(ClientKindMask::PREDICTED);
        assert_eq!(def.entity_index, 2);
        assert!(def.buffer);
        assert!(def.enableable);
        assert_eq!(def.send_to, SendTo::Owner);
        assert!(!def.send_for.contains(ClientKind::Interpolated));
        assert!(def.send_for.contains(ClientKind::Predicted));
    }

    #[test]
    fn field_position_lookup() {
        let component = ComponentDef::new(cid(1), "Owner")
            .field(FieldDef::new(fid(4), FieldCodec::bool()))
            .field(FieldDef::new(fid(9), FieldCodec::var_sint()));
        assert_eq!(component.field_position(fid(9)), Some(1));
        assert_eq!(component.field_position(fid(1)), None);
    }

    #[test]
    fn client_kind_mask_bits() {
        assert_eq!(ClientKindMask::ALL.bits(), 0b11);
        assert_eq!(ClientKindMask::INTERPOLATED.bits(), 0b01);
        assert_eq!(ClientKindMask::PREDICTED.bits(), 0b10);
    }
}
