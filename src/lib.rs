//! Merge, simplify and re-nest GeoJSON polygon boundaries for map overlays.
//!
//! The stages can be used on their own:
//! - [`merge::merge`] unions polygons into a disjoint set, keeping holes.
//! - [`simplify::simplify`] reduces ring vertices without breaking topology.
//! - [`flatten::flatten`] lists every ring of a set in the renderer's layout.
//!
//! [`pipeline`] chains them over a FeatureCollection.

pub mod config;
pub mod error;
pub mod feature;
pub mod flatten;
pub mod geom;
pub mod merge;
pub mod pipeline;
pub mod settings;
pub mod simplify;

pub use error::{Error, Result};
