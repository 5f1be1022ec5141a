use nalgebra::{Point3, Vector3};

/// An sRGB color hint with alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// `#RRGGBBAA`, the form 3MF `displaycolor` attributes take.
    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
    }

    /// Parses `#RRGGBB` or `#RRGGBBAA`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self::opaque(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Self {
                r: channel(0)?,
                g: channel(2)?,
                b: channel(4)?,
                a: channel(6)?,
            }),
            _ => None,
        }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::opaque(200, 200, 200)
    }
}

/// Axis aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Returns `true` if `other` lies inside `self`, allowing `tol`
    /// of slack on every side.
    pub fn contains(&self, other: &Aabb, tol: f64) -> bool {
        (0..3).all(|axis| {
            other.min[axis] >= self.min[axis] - tol && other.max[axis] <= self.max[axis] + tol
        })
    }
}

/// A named, colored triangle mesh in millimeters.
///
/// Faces wind counter-clockwise when seen from outside the solid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Solid {
    pub name: String,

    pub color: Rgba,

    pub vertices: Vec<Point3<f64>>,

    pub faces: Vec<[u32; 3]>,
}

impl Solid {
    pub fn new(name: impl Into<String>, color: Rgba) -> Self {
        Self {
            name: name.into(),
            color,
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    pub fn with_mesh(
        name: impl Into<String>,
        color: Rgba,
        vertices: Vec<Point3<f64>>,
        faces: Vec<[u32; 3]>,
    ) -> Self {
        Self {
            name: name.into(),
            color,
            vertices,
            faces,
        }
    }

    /// Appends a vertex and returns its index.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_vertex(&mut self, point: Point3<f64>) -> u32 {
        self.vertices.push(point);
        (self.vertices.len() - 1) as u32
    }

    pub fn push_face(&mut self, face: [u32; 3]) {
        self.faces.push(face);
    }

    /// Pushes the quad `a b c d` (counter-clockwise) as two triangles.
    pub fn push_quad(&mut self, [a, b, c, d]: [u32; 4]) {
        self.faces.push([a, b, c]);
        self.faces.push([a, c, d]);
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Returns the three corners of face `idx`.
    pub fn triangle(&self, idx: usize) -> [Point3<f64>; 3] {
        let [a, b, c] = self.faces[idx];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Unnormalized face normal; its length is twice the face area.
    pub fn face_normal(&self, idx: usize) -> Vector3<f64> {
        let [a, b, c] = self.triangle(idx);
        (b - a).cross(&(c - a))
    }

    pub fn bounds(&self) -> Option<Aabb> {
        let first = *self.vertices.first()?;
        let (min, max) = self
            .vertices
            .iter()
            .fold((first, first), |(min, max), p| (min.inf(p), max.sup(p)));
        Some(Aabb { min, max })
    }

    /// Signed enclosed volume; negative when the faces wind inward.
    pub fn signed_volume(&self) -> f64 {
        (0..self.faces.len())
            .map(|idx| {
                let [a, b, c] = self.triangle(idx);
                a.coords.dot(&b.coords.cross(&c.coords)) / 6.0
            })
            .sum()
    }

    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len())
            .map(|idx| self.face_normal(idx).norm() / 2.0)
            .sum()
    }

    /// Reverses the winding of every face.
    pub fn flip(&mut self) {
        for face in &mut self.faces {
            face.swap(1, 2);
        }
    }

    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            *vertex += offset;
        }
    }
}

#[cfg(test)]
pub(crate) fn unit_cube(name: &str) -> Solid {
    let vertices = [
        (0., 0., 0.),
        (1., 0., 0.),
        (1., 1., 0.),
        (0., 1., 0.),
        (0., 0., 1.),
        (1., 0., 1.),
        (1., 1., 1.),
        (0., 1., 1.),
    ]
    .into_iter()
    .map(|(x, y, z)| Point3::new(x, y, z))
    .collect();
    let mut cube = Solid::with_mesh(name, Rgba::default(), vertices, Vec::new());
    for quad in [
        [0, 3, 2, 1],
        [4, 5, 6, 7],
        [0, 1, 5, 4],
        [1, 2, 6, 5],
        [2, 3, 7, 6],
        [3, 0, 4, 7],
    ] {
        cube.push_quad(quad);
    }
    cube
}

#[cfg(test)]
mod tests {
    use super::{unit_cube, Rgba};
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_volume_and_area() {
        let mut cube = unit_cube("cube");
        assert_relative_eq!(cube.signed_volume(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(cube.surface_area(), 6.0, epsilon = 1e-12);
        cube.flip();
        assert_relative_eq!(cube.signed_volume(), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_bounds() {
        let cube = unit_cube("cube");
        let bounds = cube.bounds().unwrap();
        assert_relative_eq!(bounds.size().x, 1.0);
        assert!(bounds.contains(&bounds, 0.0));
    }

    #[test]
    fn test_hex_colors() {
        let brown = Rgba::opaque(120, 80, 50);
        assert_eq!(brown.to_hex(), "#785032FF");
        assert_eq!(Rgba::from_hex("#785032FF"), Some(brown));
        assert_eq!(Rgba::from_hex("#785032"), Some(brown));
        assert_eq!(Rgba::from_hex("785032"), None);
    }
}
