use crate::geometry::{Point3D, Triangle, Vector3D};
use nalgebra::Matrix4;
use std::hash::{Hash, Hasher};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Empty mesh")]
    EmptyMesh,

    #[error("Transform is not invertible")]
    SingularTransform,

    #[error("Mesh contains non-finite vertex coordinates (triangle {0})")]
    NonFinite(usize),
}

/// Triangle mesh in local space plus the placement transform applied before slicing.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub triangles: Vec<Triangle>,
    pub transform: Matrix4<f64>,
    pub bounds_min: Point3D,
    pub bounds_max: Point3D,
}

impl Mesh {
    /// Create a new mesh from triangles with an identity transform
    pub fn new(triangles: Vec<Triangle>) -> Result<Self, MeshError> {
        if triangles.is_empty() {
            return Err(MeshError::EmptyMesh);
        }
        if let Some(bad) = triangles.iter().position(|t| {
            t.vertices()
                .iter()
                .any(|v| !(v.x.is_finite() && v.y.is_finite() && v.z.is_finite()))
        }) {
            return Err(MeshError::NonFinite(bad));
        }

        let (bounds_min, bounds_max) = Self::compute_bounds(&triangles);

        Ok(Self {
            triangles,
            transform: Matrix4::identity(),
            bounds_min,
            bounds_max,
        })
    }

    /// Replace the placement transform.
    pub fn with_transform(mut self, transform: Matrix4<f64>) -> Result<Self, MeshError> {
        if transform.try_inverse().is_none() {
            return Err(MeshError::SingularTransform);
        }
        self.transform = transform;
        Ok(self)
    }

    /// Append a translation to the placement transform
    pub fn translate(&mut self, offset: Vector3D) {
        self.transform = Matrix4::new_translation(&offset) * self.transform;
    }

    /// Compute bounding box of triangles
    fn compute_bounds(triangles: &[Triangle]) -> (Point3D, Point3D) {
        let mut min = Point3D::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3D::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);

        for tri in triangles {
            for vertex in tri.vertices() {
                min.x = min.x.min(vertex.x);
                min.y = min.y.min(vertex.y);
                min.z = min.z.min(vertex.z);

                max.x = max.x.max(vertex.x);
                max.y = max.y.max(vertex.y);
                max.z = max.z.max(vertex.z);
            }
        }

        (min, max)
    }

    /// Triangles with the placement transform applied.
    pub fn transformed_triangles(&self) -> Vec<Triangle> {
        if self.transform == Matrix4::identity() {
            return self.triangles.clone();
        }
        self.triangles
            .iter()
            .map(|tri| tri.transformed(&self.transform))
            .collect()
    }

    /// World-space bounds: the eight local bounding-box corners pushed through the transform.
    pub fn world_bounds(&self) -> (Point3D, Point3D) {
        let (lo, hi) = (self.bounds_min, self.bounds_max);
        let mut min = Point3D::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3D::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);

        for corner in 0..8 {
            let local = Point3D::new(
                if corner & 1 == 0 { lo.x } else { hi.x },
                if corner & 2 == 0 { lo.y } else { hi.y },
                if corner & 4 == 0 { lo.z } else { hi.z },
            );
            let p = self.transform.transform_point(&local);
            min = min.inf(&p);
            max = max.sup(&p);
        }

        (min, max)
    }

    /// Number of triangles in mesh
    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    /// Feed vertex and transform bits into a fingerprint hasher.
    pub fn hash_geometry<H: Hasher>(&self, state: &mut H) {
        self.triangles.len().hash(state);
        for tri in &self.triangles {
            for v in tri.vertices() {
                v.x.to_bits().hash(state);
                v.y.to_bits().hash(state);
                v.z.to_bits().hash(state);
            }
        }
        for value in self.transform.iter() {
            value.to_bits().hash(state);
        }
    }

    /// Closed axis-aligned box made of twelve outward-facing triangles.
    pub fn cuboid(min: Point3D, max: Point3D) -> Result<Self, MeshError> {
        let p = |x: bool, y: bool, z: bool| {
            Point3D::new(
                if x { max.x } else { min.x },
                if y { max.y } else { min.y },
                if z { max.z } else { min.z },
            )
        };
        let quads = [
            // bottom (-z)
            [p(false, false, false), p(false, true, false), p(true, true, false), p(true, false, false)],
            // top (+z)
            [p(false, false, true), p(true, false, true), p(true, true, true), p(false, true, true)],
            // front (-y)
            [p(false, false, false), p(true, false, false), p(true, false, true), p(false, false, true)],
            // back (+y)
            [p(false, true, false), p(false, true, true), p(true, true, true), p(true, true, false)],
            // left (-x)
            [p(false, false, false), p(false, false, true), p(false, true, true), p(false, true, false)],
            // right (+x)
            [p(true, false, false), p(true, true, false), p(true, true, true), p(true, false, true)],
        ];

        let triangles = quads
            .iter()
            .flat_map(|q| [Triangle::new(q[0], q[1], q[2]), Triangle::new(q[0], q[2], q[3])])
            .collect();

        Self::new(triangles)
    }
}

/// Union bounding box across every solid of a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildBounds {
    pub min: Point3D,
    pub max: Point3D,
}

impl BuildBounds {
    pub fn new(min: Point3D, max: Point3D) -> Self {
        Self { min, max }
    }

    /// Union of the transformed bounds of every mesh. `None` for an empty set.
    pub fn from_meshes(meshes: &[Mesh]) -> Option<Self> {
        let mut iter = meshes.iter().map(Mesh::world_bounds);
        let (mut min, mut max) = iter.next()?;
        for (lo, hi) in iter {
            min = min.inf(&lo);
            max = max.sup(&hi);
        }
        Some(Self { min, max })
    }

    pub fn height(&self) -> f64 {
        self.max.z - self.min.z
    }

    pub fn hash_bits<H: Hasher>(&self, state: &mut H) {
        for v in [self.min, self.max] {
            v.x.to_bits().hash(state);
            v.y.to_bits().hash(state);
            v.z.to_bits().hash(state);
        }
    }
}
