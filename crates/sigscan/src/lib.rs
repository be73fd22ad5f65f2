//! Byte signature scanning library
//!
//! Signatures are IDA-style byte patterns (`48 8B 05 ? ? ? ? 48`) which are located inside
//! caller provided memory, or inside a named section of a module loaded into the current process.
//!
//! # Example
//!
//! ```rust
//! use sigscan::{scan::{self, Region, ScanAlignment}, Signature};
//!
//! let binary = [0x00, 0x48, 0x8B, 0x8D, 0x12, 0x34, 0x56, 0x78, 0x48, 0x99];
//! let signature = Signature::parse("48 8B 8D ? ? ? ? 48").unwrap();
//!
//! let offset = scan::find_first(&signature, &Region::new(&binary), ScanAlignment::X1);
//! assert_eq!(offset, Some(1));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod handle;
pub mod image;
pub mod module;
pub mod scan;
pub mod signature;

pub use handle::Status;
pub use signature::{Element, Signature, SignatureError};

/// An address in the current process (or in an image's virtual address space)
pub type Address = usize;
