use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tilestream_common::{TileResolution, TileSlot};

/// Interleaved attribute layout: position, normal, texel, color.
pub const FLOATS_PER_VERTEX: usize = 12;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TileVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texel: [f32; 2],
    pub color: [f32; 4],
}

/// Height field shared by every tile: `z = -amplitude * sin(f*x) * sin(f*y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceParams {
    pub amplitude: f32,
    pub frequency: f32,
    pub color: [f32; 4],
}

impl Default for SurfaceParams {
    fn default() -> Self {
        Self {
            amplitude: 0.1,
            frequency: 5.0,
            color: [0.5, 0.5, 0.8, 1.0],
        }
    }
}

impl SurfaceParams {
    fn height(&self, p: Vec2) -> f32 {
        -self.amplitude * (self.frequency * p.x).sin() * (self.frequency * p.y).sin()
    }

    fn normal(&self, p: Vec2) -> Vec3 {
        let (fx, fy) = (self.frequency * p.x, self.frequency * p.y);
        let dzdx = -self.amplitude * self.frequency * fx.cos() * fy.sin();
        let dzdy = -self.amplitude * self.frequency * fx.sin() * fy.cos();
        Vec3::new(-dzdx, -dzdy, 1.0).normalize()
    }

    fn vertex(&self, p: Vec2, origin: Vec2) -> TileVertex {
        TileVertex {
            position: [p.x, p.y, self.height(p)],
            normal: self.normal(p).to_array(),
            texel: (p - origin).to_array(),
            color: self.color,
        }
    }
}

/// Fill `out` with the triangle list for one tile.
///
/// The tile covers the unit patch whose lower-left corner is the slot's grid
/// offset, so the full grid spans `[-1, 2]` on both axes. `out` is cleared first.
pub fn generate_tile(
    slot: TileSlot,
    resolution: TileResolution,
    surface: &SurfaceParams,
    out: &mut Vec<TileVertex>,
) {
    out.clear();
    if resolution.validate().is_err() {
        return;
    }
    out.reserve(resolution.vertex_count());

    let origin = slot.offset().as_vec2();
    let dx = 1.0 / (resolution.cols - 1) as f32;
    let dy = 1.0 / (resolution.rows - 1) as f32;

    for j in 0..resolution.rows - 1 {
        for i in 0..resolution.cols - 1 {
            let p = origin + Vec2::new(i as f32 * dx, j as f32 * dy);
            let right = p + Vec2::new(dx, 0.0);
            let up = p + Vec2::new(0.0, dy);
            let corner = p + Vec2::new(dx, dy);

            for q in [p, right, up, up, right, corner] {
                out.push(surface.vertex(q, origin));
            }
        }
    }
}

/// SHA-256 of the raw vertex bytes.
pub fn content_hash(vertices: &[TileVertex]) -> [u8; 32] {
    Sha256::digest(bytemuck::cast_slice::<TileVertex, u8>(vertices)).into()
}

/// Reusable scratch buffer for building one tile at a time.
///
/// Owned by a single thread; the buffer is overwritten on every build.
#[derive(Debug)]
pub struct TileMeshBuilder {
    resolution: TileResolution,
    surface: SurfaceParams,
    scratch: Vec<TileVertex>,
}

impl TileMeshBuilder {
    pub fn new(resolution: TileResolution, surface: SurfaceParams) -> Self {
        Self {
            resolution,
            surface,
            scratch: Vec::with_capacity(resolution.vertex_count()),
        }
    }

    pub fn resolution(&self) -> TileResolution {
        self.resolution
    }

    pub fn vertex_count(&self) -> usize {
        self.resolution.vertex_count()
    }

    /// Regenerate the scratch buffer for `slot`.
    pub fn build(&mut self, slot: TileSlot) -> &[TileVertex] {
        generate_tile(slot, self.resolution, &self.surface, &mut self.scratch);
        &self.scratch
    }

    /// Bytes of the most recent build, ready for upload.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(i: usize) -> TileSlot {
        TileSlot::new(i).unwrap()
    }

    #[test]
    fn vertex_layout_is_twelve_floats() {
        assert_eq!(
            std::mem::size_of::<TileVertex>(),
            FLOATS_PER_VERTEX * std::mem::size_of::<f32>()
        );
    }

    #[test]
    fn vertex_count_matches_resolution() {
        let res = TileResolution::new(5, 7).unwrap();
        let mut out = Vec::new();
        generate_tile(slot(0), res, &SurfaceParams::default(), &mut out);
        assert_eq!(out.len(), res.vertex_count());
        assert_eq!(out.len(), 6 * 4 * 6);
    }

    #[test]
    fn generation_is_deterministic() {
        let res = TileResolution::new(12, 9).unwrap();
        let surface = SurfaceParams::default();
        for s in TileSlot::all() {
            let mut a = Vec::new();
            let mut b = vec![TileVertex::zeroed(); 3];
            generate_tile(s, res, &surface, &mut a);
            generate_tile(s, res, &surface, &mut b);
            assert_eq!(
                bytemuck::cast_slice::<TileVertex, u8>(&a),
                bytemuck::cast_slice::<TileVertex, u8>(&b)
            );
            assert_eq!(content_hash(&a), content_hash(&b));
        }
    }

    #[test]
    fn tiles_cover_their_offset_patch() {
        let res = TileResolution::new(4, 4).unwrap();
        let mut out = Vec::new();
        for s in TileSlot::all() {
            generate_tile(s, res, &SurfaceParams::default(), &mut out);
            let origin = s.offset().as_vec2();
            let eps = 1e-5;
            let (mut min, mut max) = (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN));
            for v in &out {
                let p = Vec2::new(v.position[0], v.position[1]);
                min = min.min(p);
                max = max.max(p);
            }
            assert!((min - origin).abs().max_element() < eps, "{s}: min {min}");
            assert!((max - origin - Vec2::ONE).abs().max_element() < eps, "{s}: max {max}");
        }
    }

    #[test]
    fn first_quad_winding() {
        let res = TileResolution::new(2, 2).unwrap();
        let mut out = Vec::new();
        generate_tile(slot(4), res, &SurfaceParams::default(), &mut out);
        let xy: Vec<[f32; 2]> = out.iter().map(|v| [v.position[0], v.position[1]]).collect();
        assert_eq!(
            xy,
            vec![
                [0.0, 0.0],
                [1.0, 0.0],
                [0.0, 1.0],
                [0.0, 1.0],
                [1.0, 0.0],
                [1.0, 1.0]
            ]
        );
    }

    #[test]
    fn normals_are_unit_and_texels_local() {
        let res = TileResolution::new(6, 6).unwrap();
        let mut out = Vec::new();
        generate_tile(slot(2), res, &SurfaceParams::default(), &mut out);
        for v in &out {
            let n = Vec3::from_array(v.normal);
            assert!((n.length() - 1.0).abs() < 1e-4);
            assert!(n.z > 0.0);
            assert!((0.0..=1.0 + 1e-5).contains(&v.texel[0]));
            assert!((0.0..=1.0 + 1e-5).contains(&v.texel[1]));
            assert_eq!(v.color, SurfaceParams::default().color);
        }
    }

    #[test]
    fn flat_surface_has_zero_height() {
        let surface = SurfaceParams {
            amplitude: 0.0,
            ..SurfaceParams::default()
        };
        let mut out = Vec::new();
        generate_tile(slot(1), TileResolution::new(3, 3).unwrap(), &surface, &mut out);
        assert!(out.iter().all(|v| v.position[2] == 0.0 && v.normal == [0.0, 0.0, 1.0]));
    }

    #[test]
    fn invalid_resolution_yields_nothing() {
        let mut out = vec![TileVertex::zeroed(); 4];
        let res = TileResolution { rows: 1, cols: 8 };
        generate_tile(slot(0), res, &SurfaceParams::default(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn builder_reuses_scratch() {
        let mut builder = TileMeshBuilder::new(
            TileResolution::new(3, 3).unwrap(),
            SurfaceParams::default(),
        );
        let first = builder.build(slot(0)).to_vec();
        let bytes_len = builder.bytes().len();
        assert_eq!(bytes_len, first.len() * std::mem::size_of::<TileVertex>());

        let other = builder.build(slot(8)).to_vec();
        assert_ne!(first, other);
        assert_eq!(builder.build(slot(0)), first.as_slice());
        assert_eq!(builder.vertex_count(), first.len());
    }
}
