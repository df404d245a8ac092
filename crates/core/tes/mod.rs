//! TES: the tile exchange stream.
//!
//! A TES stream carries the content of one tile model in a compact,
//! sequential varint encoding, suitable for shipping changes between
//! builders. It is laid out as:
//!
//! 1. Feature index: a count, then every feature sorted by type and id as
//!    `zigzag(id - previous) << 1 | changed`. A zero byte marks each step to
//!    the next feature type. Features are numbered from 1 in index order.
//! 2. Shared strings, shared tag tables and shared relation tables, each
//!    section a count followed by its elements. An element is shared once
//!    its repeat usage exceeds the configured threshold.
//! 3. One body per changed feature, in index order: a [`BodyFlags`] byte
//!    followed by whichever of tags, relations, geometry and members it
//!    announces.
//! 4. Removed features: a count, then `zigzag(id - previous) << 2 | type`.
//!
//! Unchanged features appear only in the index; a reader applying the
//! stream keeps its own copy of them.

pub mod flags;
mod reader;
pub mod shared;
mod writer;

pub use flags::BodyFlags;
pub use reader::TesReader;
pub use shared::SharedSection;
pub use writer::TesWriter;
