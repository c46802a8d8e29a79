//! Storage descriptors
//!
//! Types describe their reference fields with `const` descriptors built from
//! `offset_of!`, so a layout can live in a `static`:
//!
//! ```ignore
//! struct Node {
//!     next: StrongSlot,
//!     parent: WeakSlot,
//!     value: i64,
//! }
//!
//! static NODE: ClassLayout = ClassLayout::new(
//!     "Node",
//!     &[
//!         Field::strong("next", offset_of!(Node, next)),
//!         Field::weak("parent", offset_of!(Node, parent)),
//!         Field::plain("value", offset_of!(Node, value)),
//!     ],
//! );
//! ```
//!
//! A type that embeds another described type acts as its subclass: the
//! embedded layout is attached with [`ClassLayout::extends`] and its offsets
//! are rebased on the embedding field.

/// How a field relates to the object it points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Owning reference (a `StrongSlot`)
    Strong,
    /// Non-owning reference that clears itself when the target dies
    Weak,
    /// Non-owning reference that does not clear itself
    Unowned,
    /// Anything that is not a reference
    Plain,
}

impl FieldKind {
    /// Whether fields of this kind keep their target alive
    pub const fn is_owning(self) -> bool {
        matches!(self, FieldKind::Strong)
    }
}

/// A declared field (or closure capture)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name, for diagnostics
    pub name: &'static str,
    /// Byte offset from the start of the declaring type
    pub offset: usize,
    /// What the field holds
    pub kind: FieldKind,
}

impl Field {
    /// Create a field descriptor
    pub const fn new(name: &'static str, offset: usize, kind: FieldKind) -> Self {
        Self { name, offset, kind }
    }

    /// Owning reference field
    pub const fn strong(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, FieldKind::Strong)
    }

    /// Weak reference field
    pub const fn weak(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, FieldKind::Weak)
    }

    /// Unowned reference field
    pub const fn unowned(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, FieldKind::Unowned)
    }

    /// Non-reference field
    pub const fn plain(name: &'static str, offset: usize) -> Self {
        Self::new(name, offset, FieldKind::Plain)
    }
}

/// An embedded ancestor layout
#[derive(Debug, Clone, Copy)]
pub struct Superclass {
    /// Offset of the embedded ancestor value
    pub offset: usize,
    /// Layout of the ancestor
    pub layout: &'static ClassLayout,
}

/// Declared storage of a composite type
#[derive(Debug, Clone, Copy)]
pub struct ClassLayout {
    /// Type name, for diagnostics
    pub name: &'static str,
    /// Fields declared by this type itself
    pub fields: &'static [Field],
    /// Embedded ancestor, if any
    pub superclass: Option<Superclass>,
}

impl ClassLayout {
    /// Layout with no ancestor
    pub const fn new(name: &'static str, fields: &'static [Field]) -> Self {
        Self {
            name,
            fields,
            superclass: None,
        }
    }

    /// Attach an ancestor layout embedded at `offset`
    pub const fn extends(self, offset: usize, layout: &'static ClassLayout) -> Self {
        Self {
            superclass: Some(Superclass { offset, layout }),
            ..self
        }
    }
}

/// Captured variables of a closure environment
#[derive(Debug, Clone, Copy)]
pub struct CaptureLayout {
    /// Offset of the environment inside the closure object
    pub env_offset: usize,
    /// Capture descriptors, with offsets relative to the environment
    pub captures: &'static [Field],
}

/// Storage description returned by [`Object::storage`](crate::Object::storage)
#[derive(Debug, Clone, Copy)]
pub enum Storage {
    /// No reference fields at all
    Leaf,
    /// A composite type with declared fields
    Class(&'static ClassLayout),
    /// A closure whose layout is its capture set
    Closure(CaptureLayout),
    /// Storage that only the object itself can enumerate
    Opaque,
}
