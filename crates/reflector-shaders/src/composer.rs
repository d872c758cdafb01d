//! Shader-variant composition.
//!
//! A template carries `// #hook <name>` marker lines. Snippets target one hook
//! each and are gated by [`FeatureFlags`]; composing a flag set replaces every
//! marker with the enabled snippets for that hook, in registration order.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::{COMMON_WGSL, LIGHTING_WGSL, PBR_TEMPLATE_WGSL};

bitflags! {
    /// Compile-time features of a reflector shader variant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FeatureFlags: u32 {
        const DISTORTION_MAP = 1 << 0;
        const NORMAL_MAP = 1 << 1;
        const ROUGHNESS_MAP = 1 << 2;
        const DEPTH = 1 << 3;
        const BLUR = 1 << 4;
        const BUMP_MAP = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Module,
    VertexOut,
    Vertex,
    FragmentSurface,
    FragmentDiffuse,
    FragmentOutput,
}

impl Hook {
    pub const ALL: [Hook; 6] = [
        Hook::Module,
        Hook::VertexOut,
        Hook::Vertex,
        Hook::FragmentSurface,
        Hook::FragmentDiffuse,
        Hook::FragmentOutput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Hook::Module => "module",
            Hook::VertexOut => "vertex_out",
            Hook::Vertex => "vertex",
            Hook::FragmentSurface => "fragment_surface",
            Hook::FragmentDiffuse => "fragment_diffuse",
            Hook::FragmentOutput => "fragment_output",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.name() == name)
    }
}

/// Identifies a snippet; used in error reports and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnippetKind {
    ReflectorBindings,
    DistortionBinding,
    NormalMapBinding,
    RoughnessMapBinding,
    BumpMapBinding,
    DepthBinding,
    ReflectionVarying,
    ReflectionCoord,
    BumpNormal,
    NormalMapSurface,
    RoughnessMapSurface,
    Distortion,
    DistortionSample,
    ProjectiveSample,
    NormalOffset,
    DepthSampleOffset,
    DepthSampleProjective,
    DepthFade,
    DepthScaleWithBlur,
    DepthScaleNoBlur,
    BlurMix,
    Composite,
    Debug,
}

#[derive(Debug, Clone)]
pub struct Snippet {
    pub kind: SnippetKind,
    pub hook: Hook,
    /// All of these must be set for the snippet to be emitted.
    pub requires: FeatureFlags,
    /// None of these may be set.
    pub excludes: FeatureFlags,
    pub code: &'static str,
}

impl Snippet {
    pub const fn new(kind: SnippetKind, hook: Hook, code: &'static str) -> Self {
        Self {
            kind,
            hook,
            requires: FeatureFlags::empty(),
            excludes: FeatureFlags::empty(),
            code,
        }
    }

    pub const fn requires(mut self, flags: FeatureFlags) -> Self {
        self.requires = flags;
        self
    }

    pub const fn excludes(mut self, flags: FeatureFlags) -> Self {
        self.excludes = flags;
        self
    }

    pub fn enabled(&self, flags: FeatureFlags) -> bool {
        flags.contains(self.requires) && !flags.intersects(self.excludes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("template names unknown hook `{0}`")]
    UnknownHook(String),
    #[error("snippet {snippet:?} targets hook `{hook}` which the template does not contain")]
    MissingHook { hook: &'static str, snippet: SnippetKind },
}

const HOOK_MARKER: &str = "// #hook ";

/// Composes template + snippets into complete WGSL, caching one source per flag set.
pub struct ShaderComposer {
    prelude: String,
    template: String,
    snippets: Vec<Snippet>,
    cache: HashMap<FeatureFlags, Arc<str>>,
}

impl ShaderComposer {
    pub fn new(
        prelude: impl Into<String>,
        template: impl Into<String>,
        snippets: Vec<Snippet>,
    ) -> Self {
        Self {
            prelude: prelude.into(),
            template: template.into(),
            snippets,
            cache: HashMap::new(),
        }
    }

    /// The PBR template extended with the planar-reflection snippets.
    pub fn reflector() -> Self {
        Self::new(
            format!("{COMMON_WGSL}{LIGHTING_WGSL}"),
            PBR_TEMPLATE_WGSL,
            reflector_snippets(),
        )
    }

    pub fn compose(&mut self, flags: FeatureFlags) -> Result<Arc<str>, ComposeError> {
        if let Some(src) = self.cache.get(&flags) {
            return Ok(src.clone());
        }
        let src: Arc<str> = Arc::from(self.compose_uncached(flags)?);
        self.cache.insert(flags, src.clone());
        Ok(src)
    }

    pub fn cached_variants(&self) -> usize {
        self.cache.len()
    }

    fn compose_uncached(&self, flags: FeatureFlags) -> Result<String, ComposeError> {
        let mut present = Vec::new();
        for line in self.template.lines() {
            if let Some(name) = hook_name(line) {
                let hook = Hook::from_name(name)
                    .ok_or_else(|| ComposeError::UnknownHook(name.to_string()))?;
                present.push(hook);
            }
        }

        let enabled: Vec<&Snippet> = self.snippets.iter().filter(|s| s.enabled(flags)).collect();
        if let Some(s) = enabled.iter().find(|s| !present.contains(&s.hook)) {
            return Err(ComposeError::MissingHook {
                hook: s.hook.name(),
                snippet: s.kind,
            });
        }

        let mut out = String::with_capacity(self.prelude.len() + self.template.len() * 2);
        out.push_str(&self.prelude);
        for line in self.template.lines() {
            match hook_name(line).and_then(Hook::from_name) {
                Some(hook) => {
                    for s in enabled.iter().filter(|s| s.hook == hook) {
                        out.push_str(s.code);
                        if !s.code.ends_with('\n') {
                            out.push('\n');
                        }
                    }
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        Ok(out)
    }
}

fn hook_name(line: &str) -> Option<&str> {
    line.trim().strip_prefix(HOOK_MARKER).map(str::trim)
}

/// Snippets of the planar-reflection composite, in emission order.
pub fn reflector_snippets() -> Vec<Snippet> {
    use FeatureFlags as F;
    use Hook as H;
    use SnippetKind as K;

    vec![
        Snippet::new(K::ReflectorBindings, H::Module, REFLECTOR_BINDINGS),
        Snippet::new(K::DistortionBinding, H::Module, DISTORTION_BINDING)
            .requires(F::DISTORTION_MAP),
        Snippet::new(K::NormalMapBinding, H::Module, NORMAL_MAP_BINDING).requires(F::NORMAL_MAP),
        Snippet::new(K::RoughnessMapBinding, H::Module, ROUGHNESS_MAP_BINDING)
            .requires(F::ROUGHNESS_MAP),
        Snippet::new(K::BumpMapBinding, H::Module, BUMP_MAP_BINDING).requires(F::BUMP_MAP),
        Snippet::new(K::DepthBinding, H::Module, DEPTH_BINDING).requires(F::DEPTH),
        Snippet::new(
            K::ReflectionVarying,
            H::VertexOut,
            "    @location(3) reflection_coord: vec4<f32>,",
        ),
        Snippet::new(
            K::ReflectionCoord,
            H::Vertex,
            "    out.reflection_coord = reflector.texture_matrix * vec4<f32>(input.position, 1.0);",
        ),
        Snippet::new(K::BumpNormal, H::FragmentSurface, BUMP_SURFACE).requires(F::BUMP_MAP),
        Snippet::new(K::NormalMapSurface, H::FragmentSurface, NORMAL_MAP_SURFACE)
            .requires(F::NORMAL_MAP),
        Snippet::new(K::RoughnessMapSurface, H::FragmentSurface, ROUGHNESS_MAP_SURFACE)
            .requires(F::ROUGHNESS_MAP),
        Snippet::new(K::Distortion, H::FragmentDiffuse, "    var distortion_factor = 0.0;"),
        Snippet::new(K::DistortionSample, H::FragmentDiffuse, DISTORTION_SAMPLE)
            .requires(F::DISTORTION_MAP),
        Snippet::new(K::ProjectiveSample, H::FragmentDiffuse, PROJECTIVE_SAMPLE),
        Snippet::new(K::NormalOffset, H::FragmentDiffuse, NORMAL_OFFSET).requires(F::NORMAL_MAP),
        Snippet::new(
            K::DepthSampleOffset,
            H::FragmentDiffuse,
            "    let reflector_depth = sample_depth(normal_uv);",
        )
        .requires(F::DEPTH.union(F::NORMAL_MAP)),
        Snippet::new(
            K::DepthSampleProjective,
            H::FragmentDiffuse,
            "    let reflector_depth = sample_depth(reflection_coord.xy / reflection_coord.w);",
        )
        .requires(F::DEPTH)
        .excludes(F::NORMAL_MAP),
        Snippet::new(K::DepthFade, H::FragmentDiffuse, DEPTH_FADE).requires(F::DEPTH),
        Snippet::new(K::DepthScaleWithBlur, H::FragmentDiffuse, DEPTH_SCALE_WITH_BLUR)
            .requires(F::DEPTH.union(F::BLUR)),
        Snippet::new(
            K::DepthScaleNoBlur,
            H::FragmentDiffuse,
            "    merged = merged * depth_factor;",
        )
        .requires(F::DEPTH)
        .excludes(F::BLUR),
        Snippet::new(K::BlurMix, H::FragmentDiffuse, BLUR_MIX).requires(F::BLUR),
        Snippet::new(K::Composite, H::FragmentDiffuse, COMPOSITE),
        Snippet::new(K::Debug, H::FragmentOutput, DEBUG_VIEWS),
    ]
}

const REFLECTOR_BINDINGS: &str = r#"
struct ReflectorUniform {
    texture_matrix: mat4x4<f32>,
    mirror: f32,
    mix_blur: f32,
    mix_strength: f32,
    min_depth_threshold: f32,
    max_depth_threshold: f32,
    depth_scale: f32,
    depth_to_blur_ratio_bias: f32,
    distortion: f32,
    debug_view: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

@group(3) @binding(1) var<uniform> reflector: ReflectorUniform;
@group(3) @binding(2) var target_sampler: sampler;
@group(3) @binding(3) var t_sharp: texture_2d<f32>;
@group(3) @binding(4) var t_blur: texture_2d<f32>;

fn sample_projected(t: texture_2d<f32>, coord: vec4<f32>) -> vec4<f32> {
    return textureSampleLevel(t, target_sampler, coord.xy / coord.w, 0.0);
}

fn decode_reflection(c: vec3<f32>) -> vec3<f32> {
    if (frame.reflection_encoding == 1u) {
        let lo = c / 12.92;
        let hi = pow((c + vec3<f32>(0.055)) / 1.055, vec3<f32>(2.4));
        return select(hi, lo, c <= vec3<f32>(0.04045));
    }
    return c;
}

// smoothstep that tolerates edge0 == edge1
fn fade_step(edge0: f32, edge1: f32, x: f32) -> f32 {
    if (edge1 <= edge0) {
        return select(0.0, 1.0, x >= edge0);
    }
    let t = clamp((x - edge0) / (edge1 - edge0), 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t);
}
"#;

const DISTORTION_BINDING: &str = "@group(3) @binding(7) var t_distortion: texture_2d<f32>;";

const NORMAL_MAP_BINDING: &str = r#"
@group(3) @binding(8) var t_normal: texture_2d<f32>;

fn perturb_normal(
    n: vec3<f32>,
    world_pos: vec3<f32>,
    uv: vec2<f32>,
    map_n: vec3<f32>,
) -> vec3<f32> {
    let dp1 = dpdx(world_pos);
    let dp2 = dpdy(world_pos);
    let duv1 = dpdx(uv);
    let duv2 = dpdy(uv);
    let dp2perp = cross(dp2, n);
    let dp1perp = cross(n, dp1);
    let t = dp2perp * duv1.x + dp1perp * duv2.x;
    let b = dp2perp * duv1.y + dp1perp * duv2.y;
    let inv_max = inverseSqrt(max(max(dot(t, t), dot(b, b)), 1e-12));
    let tbn = mat3x3<f32>(t * inv_max, b * inv_max, n);
    return normalize(tbn * map_n);
}
"#;

const ROUGHNESS_MAP_BINDING: &str = "@group(3) @binding(9) var t_roughness: texture_2d<f32>;";

const BUMP_MAP_BINDING: &str = r#"
@group(3) @binding(10) var t_bump: texture_2d<f32>;

fn bump_normal(n: vec3<f32>, world_pos: vec3<f32>, uv: vec2<f32>) -> vec3<f32> {
    let duv_x = dpdx(uv);
    let duv_y = dpdy(uv);
    let h = textureSample(t_bump, map_sampler, uv).r;
    let dh_x = (textureSample(t_bump, map_sampler, uv + duv_x).r - h) * surface.bump_scale;
    let dh_y = (textureSample(t_bump, map_sampler, uv + duv_y).r - h) * surface.bump_scale;
    let sigma_x = dpdx(world_pos);
    let sigma_y = dpdy(world_pos);
    let r1 = cross(sigma_y, n);
    let r2 = cross(n, sigma_x);
    let det = dot(sigma_x, r1);
    let grad = sign(det) * (dh_x * r1 + dh_y * r2);
    let perturbed = abs(det) * n - grad;
    if (dot(perturbed, perturbed) < 1e-12) {
        return n;
    }
    return normalize(perturbed);
}
"#;

const DEPTH_BINDING: &str = r#"
@group(3) @binding(5) var t_depth: texture_depth_2d;
@group(3) @binding(11) var depth_sampler: sampler;

// textureLoad on depth is unavailable in GLSL; nearest sampling reads the same texel.
fn sample_depth(uv: vec2<f32>) -> f32 {
    return textureSampleLevel(t_depth, depth_sampler, clamp(uv, vec2<f32>(0.0), vec2<f32>(1.0)), 0.0);
}
"#;

const BUMP_SURFACE: &str = "    normal = bump_normal(normal, input.world_pos, uv);";

const NORMAL_MAP_SURFACE: &str = r#"
    let map_normal = textureSample(t_normal, map_sampler, uv).xyz * 2.0 - vec3<f32>(1.0);
    normal = perturb_normal(
        normal,
        input.world_pos,
        uv,
        vec3<f32>(map_normal.xy * surface.normal_scale, map_normal.z),
    );
"#;

const ROUGHNESS_MAP_SURFACE: &str =
    "    roughness_factor = roughness_factor * textureSample(t_roughness, map_sampler, uv).g;";

const DISTORTION_SAMPLE: &str = r#"

    let distortion_texel = textureSample(t_distortion, map_sampler, uv);
    distortion_factor = distortion_texel.r * reflector.distortion;
"#;

const PROJECTIVE_SAMPLE: &str = r#"
    var reflection_coord = input.reflection_coord;
    reflection_coord.x = reflection_coord.x + distortion_factor;
    reflection_coord.y = reflection_coord.y + distortion_factor;
    var base_sample = sample_projected(t_sharp, reflection_coord);
    var blur_sample = sample_projected(t_blur, reflection_coord);
    var merged = base_sample;
    var normal_uv = vec2<f32>(0.0);
    var depth_factor = 0.0001;
    var blur_factor = 0.0;
"#;

const NORMAL_OFFSET: &str = r#"
    let reflector_normal_texel = textureSample(t_normal, map_sampler, uv * surface.normal_scale);
    let reflector_normal = normalize(vec3<f32>(
        reflector_normal_texel.r * 2.0 - 1.0,
        reflector_normal_texel.b,
        reflector_normal_texel.g * 2.0 - 1.0,
    ));
    let projected = reflection_coord.xyz / reflection_coord.w;
    normal_uv = projected.xy + projected.z * reflector_normal.xz * 0.01;
    base_sample = textureSampleLevel(t_sharp, target_sampler, normal_uv, 0.0);
    blur_sample = textureSampleLevel(t_blur, target_sampler, normal_uv, 0.0);
    merged = base_sample;
"#;

const DEPTH_FADE: &str = r#"
    depth_factor = fade_step(
        reflector.min_depth_threshold,
        reflector.max_depth_threshold,
        1.0 - reflector_depth,
    );
    depth_factor = clamp(depth_factor * reflector.depth_scale, 0.0001, 1.0);
"#;

const DEPTH_SCALE_WITH_BLUR: &str = r#"
    blur_sample = blur_sample * min(1.0, depth_factor + reflector.depth_to_blur_ratio_bias);
    merged = merged * min(1.0, depth_factor + 0.5);
"#;

const BLUR_MIX: &str = r#"
    blur_factor = min(1.0, reflector.mix_blur * roughness_factor);
    merged = mix(merged, blur_sample, blur_factor);
"#;

const COMPOSITE: &str = r#"
    let mirror_amount = min(1.0, reflector.mirror);
    diffuse_color = vec4<f32>(
        diffuse_color.rgb * (1.0 - mirror_amount)
            + decode_reflection(merged.rgb) * reflector.mix_strength * mirror_amount,
        diffuse_color.a,
    );
"#;

const DEBUG_VIEWS: &str = r#"
    switch reflector.debug_view {
        case 1u: {
            output = vec4<f32>(vec3<f32>(depth_factor), 1.0);
        }
        case 2u: {
            output = vec4<f32>(vec3<f32>(blur_factor), 1.0);
        }
        case 3u: {
            let sharp = sample_projected(t_sharp, reflection_coord).rgb;
            output = vec4<f32>(decode_reflection(sharp), 1.0);
        }
        case 4u: {
            let blurred = sample_projected(t_blur, reflection_coord).rgb;
            output = vec4<f32>(decode_reflection(blurred), 1.0);
        }
        default: {}
    }
"#;
