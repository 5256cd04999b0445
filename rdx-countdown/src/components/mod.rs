//! Contains the building blocks a countdown run is assembled from.
//!
//! The fold turns raw ticks into the states consumers see, and the registry
//! tracks who is still allowed to receive them. The engine and the shared
//! runner drive these components; neither knows anything about time.

pub mod fold;
pub mod registry;
