//! Allocator kinds - the keys of the registry

use core::fmt;

use serde::{Deserialize, Serialize};

/// Selector for the allocator that services a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AllocatorKind {
    /// Global allocator, always available
    Default,
    /// Bump allocator
    Linear,
    /// Fixed-size block allocator
    Pool,
    /// LIFO allocator
    Stack,
    /// Caller-registered allocator
    Custom(u32),
}

impl AllocatorKind {
    /// Kinds populated by `MemoryManager::initialize`
    pub const BUILTIN: [AllocatorKind; 3] = [Self::Linear, Self::Pool, Self::Stack];

    /// Check if this is the system-backed kind
    #[inline]
    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl Default for AllocatorKind {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Linear => write!(f, "Linear"),
            Self::Pool => write!(f, "Pool"),
            Self::Stack => write!(f, "Stack"),
            Self::Custom(id) => write!(f, "Custom({})", id),
        }
    }
}

/// Compile-time binding of a type to an allocator kind.
///
/// `AllocatedPtr<T, K>` frees through `K::KIND`, so the kind is part of the
/// wrapper's type rather than a runtime field.
pub trait BoundKind: 'static {
    /// The kind requests are routed to
    const KIND: AllocatorKind;
}

macro_rules! bound_kind {
    ($(#[$doc:meta] $name:ident => $kind:expr;)*) => {
        $(
            #[$doc]
            #[derive(Clone, Copy, Debug, Default)]
            pub struct $name;

            impl BoundKind for $name {
                const KIND: AllocatorKind = $kind;
            }
        )*
    };
}

bound_kind! {
    /// Routes to [`AllocatorKind::Default`]
    DefaultKind => AllocatorKind::Default;
    /// Routes to [`AllocatorKind::Linear`]
    LinearKind => AllocatorKind::Linear;
    /// Routes to [`AllocatorKind::Pool`]
    PoolKind => AllocatorKind::Pool;
    /// Routes to [`AllocatorKind::Stack`]
    StackKind => AllocatorKind::Stack;
}

/// Routes to [`AllocatorKind::Custom`] with the given id
#[derive(Clone, Copy, Debug, Default)]
pub struct CustomKind<const ID: u32>;

impl<const ID: u32> BoundKind for CustomKind<ID> {
    const KIND: AllocatorKind = AllocatorKind::Custom(ID);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_kinds() {
        assert_eq!(DefaultKind::KIND, AllocatorKind::Default);
        assert_eq!(PoolKind::KIND, AllocatorKind::Pool);
        assert_eq!(CustomKind::<7>::KIND, AllocatorKind::Custom(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(AllocatorKind::Stack.to_string(), "Stack");
        assert_eq!(AllocatorKind::Custom(3).to_string(), "Custom(3)");
    }
}
