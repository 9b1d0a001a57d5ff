//! Convex collision geometry, organized as a tree of convex pieces.

use glam::Vec3;

/// Plain mesh data handed in by the caller. Each node carries the hull
/// vertices of one convex piece plus child pieces positioned relative to it.
#[derive(Debug, Clone, Default)]
pub struct MeshDescription {
    pub offset: Vec3,
    pub vertices: Vec<Vec3>,
    pub children: Vec<MeshDescription>,
}

/// A convex piece of a model flattened into the model's root frame.
#[derive(Debug, Clone)]
pub struct ModelPiece {
    /// Composed offset of this piece relative to the model root.
    pub offset: Vec3,
    /// Convex hull vertices, local to the piece.
    pub vertices: Vec<Vec3>,
}

/// Collision geometry for one body.
///
/// The tree mirrors the mesh it was built from, but all narrow-phase work
/// happens on the flattened piece list, so the composed offsets are
/// precomputed once here. The bounding radius covers every vertex of every
/// piece as seen from the root origin.
#[derive(Debug, Clone)]
pub struct ConvexModel {
    pieces: Vec<ModelPiece>,
    radius: f32,
}

impl ConvexModel {
    pub fn from_mesh(mesh: &MeshDescription) -> Self {
        let mut pieces = Vec::new();
        collect_pieces(mesh, Vec3::ZERO, &mut pieces);
        let radius = pieces
            .iter()
            .flat_map(|p| p.vertices.iter().map(move |v| (p.offset + *v).length()))
            .fold(0.0_f32, f32::max);
        Self { pieces, radius }
    }

    /// An axis-aligned box centered on the origin.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let h = half_extents;
        Self::from_mesh(&MeshDescription {
            offset: Vec3::ZERO,
            vertices: vec![
                Vec3::new(-h.x, -h.y, -h.z),
                Vec3::new(h.x, -h.y, -h.z),
                Vec3::new(h.x, -h.y, h.z),
                Vec3::new(-h.x, -h.y, h.z),
                Vec3::new(-h.x, h.y, h.z),
                Vec3::new(h.x, h.y, h.z),
                Vec3::new(h.x, h.y, -h.z),
                Vec3::new(-h.x, h.y, -h.z),
            ],
            children: Vec::new(),
        })
    }

    /// Convex pieces with composed root-relative offsets.
    pub fn pieces(&self) -> &[ModelPiece] {
        &self.pieces
    }

    /// Radius of the bounding sphere around the whole model.
    pub fn radius(&self) -> f32 {
        self.radius
    }
}

fn collect_pieces(mesh: &MeshDescription, parent_offset: Vec3, out: &mut Vec<ModelPiece>) {
    let offset = parent_offset + mesh.offset;
    if !mesh.vertices.is_empty() {
        out.push(ModelPiece {
            offset,
            vertices: mesh.vertices.clone(),
        });
    }
    for child in &mesh.children {
        collect_pieces(child, offset, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuboid_radius_reaches_corner() {
        let model = ConvexModel::cuboid(Vec3::splat(0.5));
        assert_eq!(model.pieces().len(), 1);
        assert_eq!(model.pieces()[0].vertices.len(), 8);
        assert!((model.radius() - 0.75_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn nested_mesh_offsets_compose() {
        let mesh = MeshDescription {
            offset: Vec3::new(1.0, 0.0, 0.0),
            vertices: vec![Vec3::ZERO],
            children: vec![MeshDescription {
                offset: Vec3::new(0.0, 2.0, 0.0),
                vertices: vec![Vec3::new(0.0, 0.0, 3.0)],
                children: Vec::new(),
            }],
        };
        let model = ConvexModel::from_mesh(&mesh);
        assert_eq!(model.pieces().len(), 2);
        assert_eq!(model.pieces()[1].offset, Vec3::new(1.0, 2.0, 0.0));
        // Farthest vertex: (1, 2, 3) from the root origin.
        assert!((model.radius() - 14.0_f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn empty_nodes_contribute_no_pieces() {
        let mesh = MeshDescription {
            offset: Vec3::ZERO,
            vertices: Vec::new(),
            children: vec![MeshDescription {
                offset: Vec3::ZERO,
                vertices: vec![Vec3::X],
                children: Vec::new(),
            }],
        };
        let model = ConvexModel::from_mesh(&mesh);
        assert_eq!(model.pieces().len(), 1);
    }
}
