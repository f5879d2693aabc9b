//! Request handlers for the apply gateway and the shape proxy.

mod apply;
mod shape;

pub use apply::*;
pub use shape::*;
