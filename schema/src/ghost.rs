//! Ghost type definitions.

use std::fmt;

use crate::component::GhostComponentDef;

/// Stable 128-bit ghost type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostTypeId(u128);

impl GhostTypeId {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Derives an id from a type name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash.as_bytes()[..16]);
        Self(u128::from_le_bytes(bytes))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn raw(self) -> u128 {
        self.0
    }
}

impl fmt::Display for GhostTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// How clients simulate ghosts of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GhostMode {
    /// Every client interpolates.
    #[default]
    Interpolated,
    /// Every client predicts.
    Predicted,
    /// The owner predicts, everyone else interpolates.
    OwnerPredicted,
}

/// Definition of a ghost type, as handed to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GhostTypeDef {
    pub id: GhostTypeId,
    /// Root components first, then child components by entity index.
    pub components: Vec<GhostComponentDef>,
    /// Base importance used for chunk scoring. Must be nonzero.
    pub importance: u32,
    /// Skip unchanged entities and chunks entirely.
    pub static_optimization: bool,
    /// Build record images once per tick and share them across connections.
    pub pre_serialize: bool,
    pub mode: GhostMode,
    /// Ghosts of this type serialize their group members inline.
    pub group_root: bool,
}

impl GhostTypeDef {
    /// Creates a definition with default options and no components.
    #[must_use]
    pub fn new(id: GhostTypeId) -> Self {
        Self {
            id,
            components: Vec::new(),
            importance: 1,
            static_optimization: false,
            pre_serialize: false,
            mode: GhostMode::Interpolated,
            group_root: false,
        }
    }

    /// Adds a component.
    #[must_use]
    pub fn component(mut self, component: GhostComponentDef) -> Self {
        self.components.push(component);
        self
    }

    /// Sets the base importance.
    #[must_use]
    pub const fn importance(mut self, importance: u32) -> Self {
        self.importance = importance;
        self
    }

    /// Enables static optimization.
    #[must_use]
    pub const fn static_optimization(mut self) -> Self {
        self.static_optimization = true;
        self
    }

    /// Enables pre-serialization.
    #[must_use]
    pub const fn pre_serialize(mut self) -> Self {
        self.pre_serialize = true;
        self
    }

    /// Sets the client simulation mode.
    #[must_use]
    pub const fn mode(mut self, mode: GhostMode) -> Self {
        self.mode = mode;
        self
    }

    /// Makes the type a ghost group root.
    #[must_use]
    pub const fn group_root(mut self) -> Self {
        self.group_root = true;
        self
    }
}
