//! Error types for allocators and the registry

use thiserror::Error;

use crate::kind::AllocatorKind;

/// Allocation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Request does not fit in the remaining capacity
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// The global allocator refused the request
    #[error("System allocator failed: {size} bytes aligned to {align}")]
    SystemOutOfMemory { size: usize, align: usize },

    /// Zero-byte requests are rejected by every allocator
    #[error("Zero-size allocation requested")]
    ZeroSize,

    /// Alignment is neither zero nor a power of two
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(usize),

    /// Pool request larger than one block
    #[error("Requested {requested} bytes exceeds pool block size {block_size}")]
    BlockTooSmall { requested: usize, block_size: usize },

    /// Pool blocks cannot honour the requested alignment
    #[error("Alignment {requested} unsupported, blocks are aligned to {supported}")]
    AlignmentUnsupported { requested: usize, supported: usize },

    /// Pointer was not handed out by this allocator
    #[error("Pointer does not belong to this allocator")]
    ForeignPointer,

    /// Pointer was already returned
    #[error("Double free detected")]
    DoubleFree,

    /// Stack free of anything other than the most recent allocation
    #[error("Stack free out of LIFO order")]
    OutOfOrderFree,

    /// Marker points above the current stack top
    #[error("Stale stack marker at offset {marker} (stack top is {current})")]
    StaleMarker { marker: usize, current: usize },

    /// No allocator registered for the kind
    #[error("No allocator registered for {0}")]
    UnknownKind(AllocatorKind),

    /// The system-backed kind cannot be replaced
    #[error("Allocator kind {0} is reserved")]
    ReservedKind(AllocatorKind),

    /// `initialize` called twice without a `shutdown`
    #[error("Memory manager already initialized")]
    AlreadyInitialized,

    /// Typed wrappers still hold storage from this allocator
    #[error("Allocator {kind} still backs {live} live value(s)")]
    AllocatorInUse { kind: AllocatorKind, live: usize },

    /// The registered allocator is not of the requested concrete type
    #[error("Allocator {kind} is not a {expected}")]
    TypeMismatch { kind: AllocatorKind, expected: &'static str },
}

impl AllocError {
    /// Capacity exhaustion: an operating failure the caller may recover from
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::SystemOutOfMemory { .. })
    }

    /// Misuse of an allocator: unsupported operations and invalid handles
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::ForeignPointer
                | Self::DoubleFree
                | Self::OutOfOrderFree
                | Self::StaleMarker { .. }
                | Self::BlockTooSmall { .. }
                | Self::AlignmentUnsupported { .. }
                | Self::InvalidAlignment(_)
                | Self::ZeroSize
        )
    }
}

/// Result type for allocator operations
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors from loading a memory configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid memory configuration: {0}")]
    Invalid(String),
}
