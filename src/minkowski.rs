//! GJK simplex and EPA polytope over the Minkowski difference.

use glam::Vec3;

use crate::error::{Error, Result};

/// Triangles within this distance of a plane count as coplanar. Touching
/// objects produce dot products around 1e-7, so comparing against zero is
/// not enough.
pub const EXPANSION_EPSILON: f32 = 0.00001;

/// One vertex of the Minkowski difference A - B, remembering which support
/// points on each body produced it so EPA can reconstruct contact points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportVertex {
    /// Point on the Minkowski difference.
    pub v: Vec3,
    /// Support point on body A that contributed to `v`.
    pub on_a: Vec3,
    /// Support point on body B that contributed to `v`.
    pub on_b: Vec3,
}

impl SupportVertex {
    pub fn new(on_a: Vec3, on_b: Vec3) -> Self {
        Self {
            v: on_a - on_b,
            on_a,
            on_b,
        }
    }
}

/// The GJK working simplex: one to four Minkowski difference vertices.
///
/// `build` evolves the simplex toward enclosing the origin, shrinking it
/// when a region test shows some vertices can no longer contribute. Only a
/// full tetrahedron can report enclosure.
#[derive(Debug, Clone)]
pub struct Simplex {
    v: [SupportVertex; 4],
    size: usize,
}

impl Simplex {
    pub fn new(start: SupportVertex) -> Self {
        Self {
            v: [start; 4],
            size: 1,
        }
    }

    pub fn push(&mut self, vertex: SupportVertex) {
        debug_assert!(self.size < 4);
        self.v[self.size] = vertex;
        self.size += 1;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn vertices(&self) -> &[SupportVertex] {
        &self.v[..self.size]
    }

    /// One GJK refinement step after a push.
    ///
    /// Returns `(true, _)` when the simplex is a tetrahedron enclosing the
    /// origin, otherwise `(false, direction)` where `direction` is where to
    /// search for the next support point.
    pub fn build(&mut self) -> Result<(bool, Vec3)> {
        match self.size {
            2 => Ok(self.build_2()),
            3 => Ok(self.build_3()),
            4 => Ok(self.build_4()),
            n => Err(Error::SimplexSize(n)),
        }
    }

    // The tests that created this segment guarantee the origin lies
    // somewhere between A and B.
    fn build_2(&mut self) -> (bool, Vec3) {
        let a = self.v[1].v;
        let b = self.v[0].v;
        let ab = b - a;
        let ao = -a;
        let mut direction = ab.cross(ao).cross(ab);
        if direction == Vec3::ZERO {
            // The origin is on the line itself, so the double cross is
            // degenerate. Any vector perpendicular to the line works.
            direction = if ao.x.abs() <= f32::EPSILON && ao.y.abs() <= f32::EPSILON {
                Vec3::new(0.0, 1.0, 0.0)
            } else {
                Vec3::new(ao.y, -ao.x, 0.0)
            };
        }
        (false, direction)
    }

    fn build_3(&mut self) -> (bool, Vec3) {
        // Winding order matters here: whichever way the incoming triangle
        // is wound, the triangle left behind must be counter-clockwise with
        // respect to the next point so build_4 sees a consistent base.
        let a = self.v[2].v;
        let b = self.v[1].v;
        let c = self.v[0].v;
        let ab = b - a;
        let ac = c - a;
        let ao = -a;
        let ab_x_ac = ab.cross(ac);

        let ab_perp = ab.cross(ab_x_ac);
        if ao.dot(ab_perp) > 0.0 {
            // Origin is outside the triangle on the ab side.
            self.v[0] = self.v[1];
            self.v[1] = self.v[2];
            self.size -= 1;
            return (false, ab_perp);
        }
        let ac_perp = ab_x_ac.cross(ac);
        if ao.dot(ac_perp) > 0.0 {
            // Origin is outside the triangle on the ac side.
            self.v[1] = self.v[2];
            self.size -= 1;
            return (false, ac_perp);
        }

        // Origin projects inside the triangle; above or below?
        if ab_x_ac.dot(ao) > 0.0 {
            return (false, ab_x_ac);
        }
        // Below: reverse the winding so the next point lands on top.
        self.v.swap(0, 1);
        (false, -ab_x_ac)
    }

    fn build_4(&mut self) -> (bool, Vec3) {
        // Point A sits on top of triangle BCD, which from A is wound
        // counter-clockwise.
        let a = self.v[3].v;
        let b = self.v[2].v;
        let c = self.v[1].v;
        let d = self.v[0].v;
        let ab = b - a;
        let ac = c - a;
        let ad = d - a;
        let ao = -a;

        let ab_x_ac = ab.cross(ac);
        if ab_x_ac.dot(ao) > 0.0 {
            self.v[0] = self.v[1];
            self.v[1] = self.v[2];
            self.v[2] = self.v[3];
            self.size -= 1;
            return (false, ab_x_ac);
        }
        let ac_x_ad = ac.cross(ad);
        if ac_x_ad.dot(ao) > 0.0 {
            self.v[2] = self.v[3];
            self.size -= 1;
            return (false, ac_x_ad);
        }
        let ad_x_ab = ad.cross(ab);
        if ad_x_ab.dot(ao) > 0.0 {
            self.v[1] = self.v[0];
            self.v[0] = self.v[2];
            self.v[2] = self.v[3];
            self.size -= 1;
            return (false, ad_x_ab);
        }

        // Behind all three faces means inside the tetrahedron.
        (true, Vec3::ZERO)
    }
}

/// A triangle face of the expanding polytope, with an outward unit normal.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub a: SupportVertex,
    pub b: SupportVertex,
    pub c: SupportVertex,
    pub normal: Vec3,
}

impl Triangle {
    fn new(a: SupportVertex, b: SupportVertex, c: SupportVertex) -> Result<Self> {
        let normal = (b.v - a.v)
            .cross(c.v - a.v)
            .try_normalize()
            .ok_or(Error::ZeroLengthNormal)?;
        Ok(Self { a, b, c, normal })
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    a: SupportVertex,
    b: SupportVertex,
}

/// The EPA polytope, seeded from a terminal GJK tetrahedron and expanded
/// one support point at a time until a face of the Minkowski difference
/// boundary is found.
#[derive(Debug)]
pub struct Polytope {
    triangles: Vec<Triangle>,
    edges: Vec<Edge>,
}

impl Polytope {
    /// Builds the four faces of the terminal tetrahedron. Anything other
    /// than a 4-simplex is a caller bug and fails loudly.
    pub fn new(simplex: &Simplex) -> Result<Self> {
        if simplex.size() != 4 {
            return Err(Error::IncompleteSimplex(simplex.size()));
        }
        let a = simplex.v[3];
        let b = simplex.v[2];
        let c = simplex.v[1];
        let d = simplex.v[0];
        let mut triangles = Vec::with_capacity(10);
        triangles.push(Triangle::new(a, b, c)?);
        triangles.push(Triangle::new(a, c, d)?);
        triangles.push(Triangle::new(a, d, b)?);
        triangles.push(Triangle::new(b, d, c)?);
        Ok(Self {
            triangles,
            edges: Vec::with_capacity(10),
        })
    }

    /// The face nearest the origin and its distance along the face normal.
    pub fn closest_triangle(&self) -> (Triangle, f32) {
        let mut distance = f32::MAX;
        let mut closest = self.triangles[0];
        for t in &self.triangles {
            let dot = t.a.v.dot(t.normal);
            if dot < distance {
                closest = *t;
                distance = dot;
            }
        }
        (closest, distance)
    }

    /// Grows the polytope to include a new support point: every face
    /// visible from the point is removed and the resulting horizon hole is
    /// re-tessellated as a fan around the point.
    pub fn expand(&mut self, vertex: SupportVertex) -> Result<()> {
        self.edges.clear();
        let mut i = 0;
        while i < self.triangles.len() {
            let t = self.triangles[i];
            if t.normal.dot(vertex.v - t.a.v) > EXPANSION_EPSILON {
                self.push_edge(t.a, t.b);
                self.push_edge(t.b, t.c);
                self.push_edge(t.c, t.a);
                self.triangles.remove(i);
            } else {
                i += 1;
            }
        }
        for edge in std::mem::take(&mut self.edges) {
            self.triangles.push(Triangle::new(vertex, edge.a, edge.b)?);
        }
        Ok(())
    }

    // Interior edges are shared by two removed triangles with opposite
    // winding; those cancel, leaving only the horizon.
    fn push_edge(&mut self, a: SupportVertex, b: SupportVertex) {
        if let Some(pos) = self
            .edges
            .iter()
            .position(|e| e.a.v == b.v && e.b.v == a.v)
        {
            self.edges.remove(pos);
            return;
        }
        self.edges.push(Edge { a, b });
    }
}
