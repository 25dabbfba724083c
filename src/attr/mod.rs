//! Attribute layers and geometry capture types.
//!
//! This module contains the data model handed across the editor boundary:
//! - [`AttrKind`] - Typed classification of attribute layers (stride + capabilities)
//! - [`AttrLayer`] / [`LayerGroup`] - Named fixed-stride arrays per geometry domain
//! - [`GeometryData`] - Full raw capture of one object's editable geometry

mod kind;
mod layer;

pub use kind::*;
pub use layer::*;
