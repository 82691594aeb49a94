//! # Error Taxonomy
//!
//! Every non-blocking operation across the kernel returns a tagged outcome
//! instead of panicking or propagating silently. `OsError` is the closed set
//! of kinds that can occur; individual subsystems only ever produce the
//! subset that applies to them (e.g. the memory pool never returns
//! `NotOwner`).
//!
//! The one condition this crate does *not* represent as an `OsError` is a
//! stack-guard mismatch: that is fatal and unrecoverable, handled by a
//! diagnostic plus a permanent halt rather than a returned value.

#[cfg(feature = "defmt")]
use defmt::Format;

/// Outcome kind for a failed try-style operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum OsError {
    /// Null handle, zero size, misaligned address, or out-of-range index.
    Invalid,
    /// The resource has nothing available right now (pool, queue, semaphore).
    Empty,
    /// The resource has no room left (pool, queue).
    Full,
    /// The per-tick operation budget is exhausted (pool).
    Busy,
    /// The elapsed tick count reached the caller's bound.
    Timeout,
    /// The caller does not hold the mutex it tried to unlock.
    NotOwner,
}

/// Result alias used throughout the kernel's public API.
pub type OsResult<T> = Result<T, OsError>;
