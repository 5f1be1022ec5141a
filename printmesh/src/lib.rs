//! Triangle solids destined for a slicer.
//!
//! A [`Solid`] is an indexed triangle mesh in millimeters with a name
//! and a color hint. [`inspect`] reports whether it is closed and
//! 2-manifold; [`stl`] and [`threemf`] move solids in and out of the
//! two formats slicers read.

mod error;
mod solid;
pub mod stl;
pub mod threemf;
mod topology;

pub use crate::{
    error::MeshError,
    solid::{Aabb, Rgba, Solid},
    topology::{defect_vertices, inspect, MeshReport},
};
pub use nalgebra::{Point3, Vector3};
