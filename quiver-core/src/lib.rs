//! Quiver Core
//!
//! This crate provides the fine-grained reactive engine behind the Quiver UI
//! layer. It implements:
//!
//! - Atoms: single reactive value slots
//! - Reactive wrappers over objects, arrays, maps and sets
//! - Memos: lazily recomputed derived values
//! - Effects and effect scopes
//!
//! # Architecture
//!
//! Everything lives in the `reactive` module. Reads performed while a
//! computation runs subscribe that computation to the slot that was read;
//! writes notify exactly the computations subscribed to the written slot.
//!
//! # Example
//!
//! ```rust
//! use quiver_core::reactive::{atom, effect, memo};
//!
//! // Create an atom
//! let count = atom(0);
//!
//! // Create a derived value
//! let reader = count.clone();
//! let doubled = memo(move || reader.get().as_f64().unwrap_or(0.0) * 2.0);
//!
//! // Create an effect
//! let (reader, doubled_reader) = (count.clone(), doubled.clone());
//! let _e = effect(move || {
//!     println!("Count: {:?}, Doubled: {}", reader.get(), doubled_reader.get());
//! });
//!
//! // Update the atom
//! count.set(5);
//! // Effect automatically runs, prints: "Count: Number(5.0), Doubled: 10"
//! ```

pub mod error;
pub mod reactive;

pub use error::{ReactiveError, Result};
