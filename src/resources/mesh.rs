//! Geometry data, generation and GPU upload

use glam::{Vec2, Vec3};

use crate::backend::*;

use super::allocator::BufferAllocator;
use super::buffer::BufferSegment;

/// Sphere enclosing every vertex of a geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// Ritter's approximate bounding sphere
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(&first) = points.first() else {
            return Self {
                center: Vec3::ZERO,
                radius: 0.0,
            };
        };
        let farthest_from = |origin: Vec3| {
            points
                .iter()
                .copied()
                .max_by(|a, b| {
                    origin
                        .distance_squared(*a)
                        .total_cmp(&origin.distance_squared(*b))
                })
                .unwrap_or(origin)
        };
        let y = farthest_from(first);
        let z = farthest_from(y);

        let mut center = (y + z) * 0.5;
        let mut radius = y.distance(z) * 0.5;
        for &point in points {
            let distance = center.distance(point);
            if distance > radius {
                let grown = (radius + distance) * 0.5;
                center += (point - center) * ((grown - radius) / distance);
                radius = grown;
            }
        }
        Self { center, radius }
    }
}

/// Triangle geometry in object space.
///
/// Normals and texture coordinates are optional but, when present, have one entry per
/// position. Indices are 16 bit.
#[derive(Debug, Clone)]
pub struct Geometry {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    uvs: Vec<Vec2>,
    indices: Vec<u16>,
    topology: PrimitiveTopology,
    billboard: bool,
    bounds: BoundingSphere,
}

/// Vertices addressable by 16 bit indices
pub const MAX_VERTEX_COUNT: u32 = u16::MAX as u32 + 1;

const MAX_PLANE_SUBDIVISIONS: u32 = 255;

impl Geometry {
    /// Validate and build a geometry from raw arrays.
    pub fn new(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        uvs: Vec<Vec2>,
        indices: Vec<u16>,
        topology: PrimitiveTopology,
    ) -> BackendResult<Self> {
        if positions.is_empty() {
            return Err(BackendError::InvalidArgument("geometry without vertices".into()));
        }
        if positions.len() > MAX_VERTEX_COUNT as usize {
            return Err(BackendError::InvalidArgument(format!(
                "{} vertices exceed 16 bit indexing",
                positions.len()
            )));
        }
        if !normals.is_empty() && normals.len() != positions.len() {
            return Err(BackendError::InvalidArgument(
                "normal count differs from position count".into(),
            ));
        }
        if !uvs.is_empty() && uvs.len() != positions.len() {
            return Err(BackendError::InvalidArgument(
                "texture coordinate count differs from position count".into(),
            ));
        }
        if let Some(index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(BackendError::InvalidArgument(format!(
                "index {} out of range",
                index
            )));
        }
        let bounds = BoundingSphere::from_points(&positions);
        Ok(Self {
            positions,
            normals,
            uvs,
            indices,
            topology,
            billboard: false,
            bounds,
        })
    }

    /// Unit quad in the XY plane that the billboard shader turns towards the camera
    pub fn billboard() -> Self {
        let positions = vec![
            Vec3::new(-0.5, -0.5, 0.0),
            Vec3::new(0.5, -0.5, 0.0),
            Vec3::new(-0.5, 0.5, 0.0),
            Vec3::new(0.5, 0.5, 0.0),
        ];
        let uvs = vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
        ];
        Self {
            positions,
            normals: Vec::new(),
            uvs,
            indices: Vec::new(),
            topology: PrimitiveTopology::TriangleStrip,
            billboard: true,
            bounds: BoundingSphere {
                center: Vec3::ZERO,
                radius: std::f32::consts::SQRT_2 / 2.0,
            },
        }
    }

    /// Unit cube centered at the origin
    pub fn cube() -> Self {
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];
        let corners = [
            (Vec2::new(-0.5, -0.5), Vec2::new(0.0, 1.0)),
            (Vec2::new(0.5, -0.5), Vec2::new(1.0, 1.0)),
            (Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)),
            (Vec2::new(-0.5, 0.5), Vec2::new(0.0, 0.0)),
        ];

        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut uvs = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (face, (normal, right, up)) in faces.into_iter().enumerate() {
            for (corner, uv) in corners {
                positions.push(normal * 0.5 + right * corner.x + up * corner.y);
                normals.push(normal);
                uvs.push(uv);
            }
            let base = face as u16 * 4;
            // Counter-clockwise seen from outside in a left-handed frame
            indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
        }
        Self::from_generated(positions, normals, uvs, indices)
    }

    /// UV sphere of diameter 1
    ///
    /// Tessellation is reduced until the vertex grid fits 16 bit indices.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.clamp(3, MAX_VERTEX_COUNT / 3 - 1);
        let rings = rings.clamp(2, MAX_VERTEX_COUNT / (segments + 1) - 1);
        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut uvs = Vec::new();
        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();
            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                positions.push(normal * 0.5);
                normals.push(normal);
                uvs.push(Vec2::new(
                    segment as f32 / segments as f32,
                    ring as f32 / rings as f32,
                ));
            }
        }

        let mut indices = Vec::new();
        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                let (current, next) = (current as u16, next as u16);
                indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }
        Self::from_generated(positions, normals, uvs, indices)
    }

    /// Plane on the XZ axis facing up
    ///
    /// At most 255 subdivisions per side fit 16 bit indices.
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let subdivisions = subdivisions.clamp(1, MAX_PLANE_SUBDIVISIONS);
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                positions.push(Vec3::new(
                    -width / 2.0 + x as f32 * step_x,
                    0.0,
                    -depth / 2.0 + z as f32 * step_z,
                ));
                uvs.push(Vec2::new(
                    x as f32 / subdivisions as f32,
                    z as f32 / subdivisions as f32,
                ));
            }
        }
        let normals = vec![Vec3::Y; positions.len()];

        let mut indices = Vec::new();
        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                let (current, next) = (current as u16, next as u16);
                indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }
        Self::from_generated(positions, normals, uvs, indices)
    }

    fn from_generated(
        positions: Vec<Vec3>,
        normals: Vec<Vec3>,
        uvs: Vec<Vec2>,
        indices: Vec<u16>,
    ) -> Self {
        let bounds = BoundingSphere::from_points(&positions);
        Self {
            positions,
            normals,
            uvs,
            indices,
            topology: PrimitiveTopology::TriangleList,
            billboard: false,
            bounds,
        }
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn is_billboard(&self) -> bool {
        self.billboard
    }

    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    pub fn bounds(&self) -> BoundingSphere {
        self.bounds
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    /// Format the geometry uploads in when drawn with a material that does or does not
    /// sample textures
    pub fn vertex_format(&self) -> VertexFormat {
        if self.billboard {
            VertexFormat::PT
        } else if self.has_uvs() {
            VertexFormat::PNT
        } else {
            VertexFormat::PN
        }
    }

    /// Interleave the vertex arrays in `format`; missing attributes are zero-filled.
    pub fn vertex_data(&self, format: VertexFormat) -> Vec<u8> {
        let normal = |i: usize| self.normals.get(i).copied().unwrap_or(Vec3::ZERO).to_array();
        let uv = |i: usize| self.uvs.get(i).copied().unwrap_or(Vec2::ZERO).to_array();
        let positions = self.positions.iter().enumerate();
        match format {
            VertexFormat::PN => {
                let vertices: Vec<VertexPN> = positions
                    .map(|(i, p)| VertexPN {
                        position: p.to_array(),
                        normal: normal(i),
                    })
                    .collect();
                bytemuck::cast_slice(&vertices).to_vec()
            }
            VertexFormat::PNT => {
                let vertices: Vec<VertexPNT> = positions
                    .map(|(i, p)| VertexPNT {
                        position: p.to_array(),
                        normal: normal(i),
                        uv: uv(i),
                    })
                    .collect();
                bytemuck::cast_slice(&vertices).to_vec()
            }
            VertexFormat::PT => {
                let vertices: Vec<VertexPT> = positions
                    .map(|(i, p)| VertexPT {
                        position: p.to_array(),
                        uv: uv(i),
                    })
                    .collect();
                bytemuck::cast_slice(&vertices).to_vec()
            }
        }
    }

    /// Copy the geometry into segments of `allocator`.
    pub fn upload(
        &self,
        backend: &mut dyn GraphicsBackend,
        allocator: &mut BufferAllocator,
        format: VertexFormat,
    ) -> BackendResult<GeometryBuffers> {
        let vertices = allocator.allocate(
            backend,
            BufferKind::Vertex,
            BufferUsage::Immutable,
            self.vertex_count(),
            format.stride(),
        )?;
        allocator.write(backend, &vertices, &self.vertex_data(format))?;

        let indices = if self.indices.is_empty() {
            None
        } else {
            let segment = allocator.allocate(
                backend,
                BufferKind::Index,
                BufferUsage::Immutable,
                self.indices.len() as u32,
                std::mem::size_of::<u16>() as u32,
            )?;
            allocator.write(backend, &segment, bytemuck::cast_slice(&self.indices))?;
            Some(segment)
        };

        Ok(GeometryBuffers {
            vertices,
            indices,
            format,
            vertex_count: self.vertex_count(),
            index_count: self.indices.len() as u32,
            topology: self.topology,
        })
    }
}

/// GPU-resident copy of a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryBuffers {
    pub vertices: BufferSegment,
    pub indices: Option<BufferSegment>,
    pub format: VertexFormat,
    pub vertex_count: u32,
    pub index_count: u32,
    pub topology: PrimitiveTopology,
}
