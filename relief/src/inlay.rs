//! The printed track that seats into the groove.

use crate::{
    config::{GrooveProfile, InlayProfile},
    sweep::{sweep, Stations},
    ReliefError, C,
};
use geo::geometry::Coord;
use log::debug;
use printmesh::{Rgba, Solid};
use std::time::Instant;

pub const TRACK_COLOR: Rgba = Rgba::opaque(230, 40, 40);

/// Segments per rounded top corner.
const ARC_SEGMENTS: usize = 4;

const EPSILON: C = 1e-9;

fn clearance_err(inlay: &InlayProfile, reason: &'static str) -> ReliefError {
    ReliefError::InvalidParameter {
        name: "inlay.clearance",
        value: inlay.clearance(),
        reason,
    }
}

/// Inlay cross-section in `(r, u)`, counter-clockwise.
///
/// The groove's walls and floor moved inward by the clearance, cut
/// off `relief` above the surface with rounded top corners.
pub fn section(groove: &GrooveProfile, inlay: &InlayProfile) -> Result<Vec<Coord<C>>, ReliefError> {
    let half_top = groove.width() / 2.0;
    let half_floor = half_top - groove.chamfer();
    let depth = groove.depth();
    let clearance = inlay.clearance();
    let relief = inlay.relief();

    let wall_x = half_top - clearance;
    let floor_y = clearance - depth;
    if wall_x <= EPSILON {
        return Err(clearance_err(inlay, "leaves no room in the groove"));
    }
    if floor_y >= 0.0 {
        return Err(clearance_err(inlay, "is deeper than the groove"));
    }

    // Chamfer wall from the floor corner up to the surface, moved
    // inward along its normal.
    let run = Coord {
        x: groove.chamfer(),
        y: depth,
    };
    let len = run.x.hypot(run.y);
    let dir = Coord {
        x: run.x / len,
        y: run.y / len,
    };
    let origin = Coord {
        x: half_floor - clearance * dir.y,
        y: -depth + clearance * dir.x,
    };
    let at_y = |y: C| origin.x + (y - origin.y) / dir.y * dir.x;

    let floor_x = at_y(floor_y);
    if floor_x <= EPSILON {
        return Err(clearance_err(inlay, "leaves no inlay floor"));
    }

    // Where the chamfer meets the vertical wall, if it does below
    // the top.
    let knee_y = if dir.x > EPSILON {
        origin.y + (wall_x - origin.x) / dir.x * dir.y
    } else {
        floor_y
    };

    let mut right = vec![Coord {
        x: floor_x,
        y: floor_y,
    }];
    if knee_y >= relief {
        // Too shallow for a vertical wall; the top meets the chamfer.
        right.push(Coord {
            x: at_y(relief),
            y: relief,
        });
    } else {
        let radius = inlay
            .top_radius()
            .min(0.45 * 2.0 * wall_x)
            .min(relief - knee_y);
        if knee_y < relief - radius - EPSILON && knee_y > floor_y + EPSILON {
            right.push(Coord {
                x: wall_x,
                y: knee_y,
            });
        }
        if radius > EPSILON {
            let center = Coord {
                x: wall_x - radius,
                y: relief - radius,
            };
            for k in 0..=ARC_SEGMENTS {
                #[allow(clippy::cast_precision_loss)]
                let angle = std::f64::consts::FRAC_PI_2 * k as C / ARC_SEGMENTS as C;
                right.push(Coord {
                    x: center.x + radius * angle.cos(),
                    y: center.y + radius * angle.sin(),
                });
            }
        } else {
            right.push(Coord {
                x: wall_x,
                y: relief,
            });
        }
    }

    let left: Vec<Coord<C>> = right.iter().rev().map(|c| Coord { x: -c.x, y: c.y }).collect();
    right.extend(left);
    Ok(right)
}

/// Result of [`InlayBuilder::build`].
#[derive(Debug, Clone)]
pub struct Inlay {
    pub solid: Solid,

    /// Arc length the section was swept over.
    pub sweep_length: C,
}

pub struct InlayBuilder {
    groove: GrooveProfile,
    inlay: InlayProfile,
}

impl InlayBuilder {
    /// `groove` is the profile actually cut, which may be smaller than
    /// the configured one after a carve retry.
    pub fn new(groove: GrooveProfile, inlay: InlayProfile) -> Self {
        Self { groove, inlay }
    }

    /// Sweeps the inlay through the same stations as the groove.
    pub fn build(&self, stations: &Stations) -> Result<Inlay, ReliefError> {
        let now = Instant::now();
        let section = section(&self.groove, &self.inlay)?;
        let solid = sweep(stations, &section, "track", TRACK_COLOR);
        debug!(
            "inlay; stations: {}, section: {}, exec: {:?}",
            stations.len(),
            section.len(),
            now.elapsed()
        );
        Ok(Inlay {
            solid,
            sweep_length: stations.length(),
        })
    }
}
