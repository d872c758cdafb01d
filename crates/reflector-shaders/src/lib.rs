//! reflector-shaders: WGSL shader sources and the variant composer.

mod composer;

pub use composer::{
    ComposeError, FeatureFlags, Hook, ShaderComposer, Snippet, SnippetKind, reflector_snippets,
};

/// Structs shared by every 3D shader. Layouts mirror the `#[repr(C)]` structs in reflector-core.
pub const COMMON_WGSL: &str = r#"
struct CameraUniform {
    view_proj: mat4x4<f32>,
    position: vec4<f32>,
};

struct ObjectUniform {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
};

struct SurfaceUniform {
    base_color: vec4<f32>,   // linear rgba
    emissive: vec4<f32>,     // linear rgb, already scaled by intensity
    metalness: f32,
    roughness: f32,
    env_intensity: f32,
    bump_scale: f32,
    normal_scale: vec2<f32>,
    map_repeat: vec2<f32>,
};

struct Light {
    position: vec4<f32>,     // w = 0 directional (xyz = direction), w = 1 point
    color: vec4<f32>,        // rgb * intensity, w = range (0 = unbounded)
};

struct FrameUniform {
    ambient: vec4<f32>,
    environment: vec4<f32>,
    lights: array<Light, 4>,
    light_count: u32,
    reflection_encoding: u32, // 0 linear, 1 srgb
    _pad0: u32,
    _pad1: u32,
};

struct VsIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};
"#;

/// Cook-Torrance + Lambert lighting. Expects a `frame: FrameUniform` binding in scope.
pub const LIGHTING_WGSL: &str = r#"
const PI: f32 = 3.14159265;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * d * d, 1e-6);
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    let gv = n_dot_v / (n_dot_v * (1.0 - k) + k);
    let gl = n_dot_l / (n_dot_l * (1.0 - k) + k);
    return gv * gl;
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn shade_pbr(
    albedo: vec3<f32>,
    metalness: f32,
    roughness: f32,
    n: vec3<f32>,
    v: vec3<f32>,
    world_pos: vec3<f32>,
    env_intensity: f32,
) -> vec3<f32> {
    let rough = clamp(roughness, 0.04, 1.0);
    let f0 = mix(vec3<f32>(0.04), albedo, metalness);
    let diffuse_color = albedo * (1.0 - metalness);
    let n_dot_v = max(dot(n, v), 1e-4);
    var color = (frame.ambient.rgb + frame.environment.rgb * env_intensity) * diffuse_color;
    for (var i = 0u; i < frame.light_count; i = i + 1u) {
        let light = frame.lights[i];
        var l = normalize(-light.position.xyz);
        var attenuation = 1.0;
        if (light.position.w > 0.5) {
            let to_light = light.position.xyz - world_pos;
            let dist = length(to_light);
            l = to_light / max(dist, 1e-4);
            if (light.color.w > 0.0) {
                let falloff = clamp(1.0 - dist / light.color.w, 0.0, 1.0);
                attenuation = falloff * falloff;
            }
        }
        let h = normalize(v + l);
        let n_dot_l = max(dot(n, l), 0.0);
        let n_dot_h = max(dot(n, h), 0.0);
        let v_dot_h = max(dot(v, h), 0.0);
        let f = fresnel_schlick(v_dot_h, f0);
        let d = distribution_ggx(n_dot_h, rough);
        let g = geometry_smith(n_dot_v, n_dot_l, rough);
        let specular = d * g * f / max(4.0 * n_dot_v * n_dot_l, 1e-4);
        let kd = vec3<f32>(1.0) - f;
        let radiance = light.color.rgb * n_dot_l * attenuation;
        color = color + (kd * diffuse_color + specular * PI) * radiance;

    }
    return color;
}
"#;

/// Forward shader for ordinary scene nodes; used by the mirrored pass and the main pass.
pub const SCENE_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> camera: CameraUniform;
@group(1) @binding(0) var<uniform> object: ObjectUniform;
@group(1) @binding(1) var<uniform> surface: SurfaceUniform;
@group(2) @binding(0) var<uniform> frame: FrameUniform;

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

@vertex
fn vs_main(input: VsIn) -> VsOut {
    let world = object.model * vec4<f32>(input.position, 1.0);
    var out: VsOut;
    out.clip = camera.view_proj * world;
    out.world_pos = world.xyz;
    out.normal = normalize((object.normal_matrix * vec4<f32>(input.normal, 0.0)).xyz);
    return out;
}

@fragment
fn fs_main(input: VsOut, @builtin(front_facing) front_facing: bool) -> @location(0) vec4<f32> {
    let n0 = normalize(input.normal);
    let n = select(-n0, n0, front_facing);
    let v = normalize(camera.position.xyz - input.world_pos);
    let lit = shade_pbr(
        surface.base_color.rgb,
        surface.metalness,
        surface.roughness,
        n,
        v,
        input.world_pos,
        surface.env_intensity,
    );
    return vec4<f32>(lit + surface.emissive.rgb, surface.base_color.a);
}
"#;

/// Separable gaussian blur over a fullscreen triangle. One direction per pass.
pub const BLUR_WGSL: &str = r#"
struct BlurUniform {
    direction: vec2<f32>,
    texel: vec2<f32>,
    tap_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
    weights: array<vec4<f32>, 8>,
    offsets: array<vec4<f32>, 8>,
};

@group(0) @binding(0) var src_tex: texture_2d<f32>;
@group(0) @binding(1) var src_smp: sampler;
@group(0) @binding(2) var<uniform> params: BlurUniform;

@vertex
fn vs_main(@builtin(vertex_index) vi: u32) -> @builtin(position) vec4<f32> {
    var pos = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>( 3.0, -1.0),
        vec2<f32>(-1.0,  3.0),
    );
    return vec4<f32>(pos[vi], 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    let uv = frag.xy * params.texel;
    var color = textureSampleLevel(src_tex, src_smp, uv, 0.0) * params.weights[0].x;
    for (var i = 1u; i < params.tap_count; i = i + 1u) {
        let w = params.weights[i / 4u][i % 4u];
        let o = params.offsets[i / 4u][i % 4u] * params.direction * params.texel;
        let pair = textureSampleLevel(src_tex, src_smp, uv + o, 0.0)
            + textureSampleLevel(src_tex, src_smp, uv - o, 0.0);
        color = color + pair * w;
    }
    return color;
}
"#;

/// Base PBR surface template. Extension points are `// #hook <name>` lines.
pub const PBR_TEMPLATE_WGSL: &str = r#"
@group(0) @binding(0) var<uniform> camera: CameraUniform;
@group(1) @binding(0) var<uniform> object: ObjectUniform;
@group(2) @binding(0) var<uniform> frame: FrameUniform;
@group(3) @binding(0) var<uniform> surface: SurfaceUniform;
@group(3) @binding(6) var map_sampler: sampler;

// #hook module

struct VsOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    // #hook vertex_out
};

@vertex
fn vs_main(input: VsIn) -> VsOut {
    let world = object.model * vec4<f32>(input.position, 1.0);
    var out: VsOut;
    out.clip = camera.view_proj * world;
    out.world_pos = world.xyz;
    out.normal = normalize((object.normal_matrix * vec4<f32>(input.normal, 0.0)).xyz);
    out.uv = input.uv;
    // #hook vertex
    return out;
}

@fragment
fn fs_main(input: VsOut, @builtin(front_facing) front_facing: bool) -> @location(0) vec4<f32> {
    let uv = input.uv * surface.map_repeat;
    let n0 = normalize(input.normal);
    let geometric_normal = select(-n0, n0, front_facing);
    var normal = geometric_normal;
    var diffuse_color = surface.base_color;
    var roughness_factor = surface.roughness;
    // #hook fragment_surface
    // #hook fragment_diffuse
    let view_dir = normalize(camera.position.xyz - input.world_pos);
    let lit = shade_pbr(
        diffuse_color.rgb,
        surface.metalness,
        roughness_factor,
        normal,
        view_dir,
        input.world_pos,
        surface.env_intensity,
    );
    var output = vec4<f32>(lit + surface.emissive.rgb, diffuse_color.a);
    // #hook fragment_output
    return output;
}
"#;

/// Shader source for ordinary scene nodes with the shared prelude attached.
pub fn scene_shader_source() -> String {
    format!("{COMMON_WGSL}{LIGHTING_WGSL}{SCENE_WGSL}")
}
