//! Global memory allocator configuration.
//!
//! This module configures the global memory allocator for the application.
//! We use `mimalloc` (Microsoft's high-performance allocator) instead of the
//! system allocator to improve performance on the large frame and chunk buffers
//! that the payload and staging codecs allocate and free repeatedly over the
//! lifetime of an operation.

use mimalloc::MiMalloc;

/// The global allocator instance.
///
/// We use the default `MiMalloc` configuration. This static instance is
/// registered as the `#[global_allocator]`, replacing the standard library's
/// default system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
