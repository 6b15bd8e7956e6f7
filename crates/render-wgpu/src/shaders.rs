/// WGSL shader for streamed terrain tiles.
///
/// Vertex layout matches `tilestream_mesh::TileVertex`: position, normal,
/// texel, color; 48-byte stride.
pub const TILE_SHADER: &str = r#"
struct Uniforms {
    view_proj: mat4x4<f32>,
    light_dir: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> uniforms: Uniforms;

struct TileInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) texel: vec2<f32>,
    @location(3) color: vec4<f32>,
};

struct TileOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) texel: vec2<f32>,
    @location(2) color: vec4<f32>,
};

@vertex
fn vs_tile(vertex: TileInput) -> TileOutput {
    var out: TileOutput;
    out.clip_position = uniforms.view_proj * vec4<f32>(vertex.position, 1.0);
    out.normal = normalize(vertex.normal);
    out.texel = vertex.texel;
    out.color = vertex.color;
    return out;
}

@fragment
fn fs_tile(in: TileOutput) -> @location(0) vec4<f32> {
    let light_dir = normalize(uniforms.light_dir.xyz);
    let ambient = 0.3;
    let diffuse = max(dot(normalize(in.normal), light_dir), 0.0);
    // Faint seam at tile borders so regenerated tiles are easy to spot.
    let edge = min(min(in.texel.x, 1.0 - in.texel.x), min(in.texel.y, 1.0 - in.texel.y));
    let seam = select(1.0, 0.75, edge < 0.01);
    let lighting = (ambient + diffuse * 0.7) * seam;
    return vec4<f32>(in.color.rgb * lighting, in.color.a);
}
"#;
