//! Piece-table editable binary buffer engine.
//!
//! Layering, bottom-up: [`device`] gives random-access byte storage with a
//! read cache and cross-process exclusivity; [`span`] and [`chain`] build
//! the piece-table span chain on top of that; [`document`] adds undo/redo
//! and modification tracking over a chain; [`save`] handles writing a
//! document back to storage, including in-place dissolution; [`finder`]
//! and [`clipboard`] are independent utilities a host wires in alongside
//! the document.

pub mod chain;
pub mod clipboard;
pub mod config;
pub mod device;
pub mod document;
pub mod error;
pub mod finder;
pub mod lock;
pub mod save;
pub mod span;

pub use chain::SpanChain;
pub use config::CacheConfig;
pub use device::Device;
pub use document::{ConstantFrame, Document, DocumentObserver};
pub use error::{HexError, Result};
pub use finder::BinaryFinder;
pub use span::Span;
