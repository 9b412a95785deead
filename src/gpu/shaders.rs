// ============================================================================
// GPU SHADERS — WGSL kept inline
// ============================================================================

// ============================================================================
// CANVAS SHADER — background quad + textured canvas quad
// ============================================================================
//
// Both passes draw the same world-space square [-half, half]² and map it
// through the view:  screen = world * zoom + pan.  Screen → NDC flips Y once
// (screen y grows downward, NDC y grows upward), so texture row 0 (world
// y = -half) lands at the top of the square.  No other flip happens anywhere.
pub const CANVAS_SHADER: &str = r#"
struct ViewUniforms {
    pan: vec2<f32>,          // Screen pixels
    viewport: vec2<f32>,     // Container size in pixels
    zoom: f32,
    half_size: f32,
    _pad: vec2<f32>,
    color: vec4<f32>,        // Background color (straight alpha)
};

@group(0) @binding(0) var<uniform> u: ViewUniforms;
@group(1) @binding(0) var canvas_tex: texture_2d<f32>;
@group(1) @binding(1) var canvas_samp: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

fn quad_vertex(vi: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let unit = corners[vi];

    let world = (unit * 2.0 - vec2<f32>(1.0, 1.0)) * u.half_size;
    let screen = world * u.zoom + u.pan;
    let ndc = vec2<f32>(
        (screen.x / u.viewport.x) * 2.0 - 1.0,
        1.0 - (screen.y / u.viewport.y) * 2.0
    );

    var out: VertexOutput;
    out.position = vec4<f32>(ndc, 0.0, 1.0);
    out.uv = unit;
    return out;
}

@vertex
fn vs_background(@builtin(vertex_index) vi: u32) -> VertexOutput {
    return quad_vertex(vi);
}

@fragment
fn fs_background(in: VertexOutput) -> @location(0) vec4<f32> {
    return u.color;
}

@vertex
fn vs_canvas(@builtin(vertex_index) vi: u32) -> VertexOutput {
    return quad_vertex(vi);
}

@fragment
fn fs_canvas(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(canvas_tex, canvas_samp, in.uv);
}
"#;
