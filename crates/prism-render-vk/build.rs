// SPDX-License-Identifier: CEPL-1.0
use std::error::Error;
use std::{env, fs, path::PathBuf};

// GLSL source in the workspace `shaders/` dir → SPIR-V file name the
// pipeline loads.
const SHADERS: [(&str, shaderc::ShaderKind, &str); 2] = [
    ("tri_mesh.vert", shaderc::ShaderKind::Vertex, "tri_mesh.vert.spv"),
    (
        "colored_triangle.frag",
        shaderc::ShaderKind::Fragment,
        "colored_triangle.frag.spv",
    ),
];

fn main() -> Result<(), Box<dyn Error>> {
    let manifest = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let src_dir = manifest.join("../../shaders");
    let out_dir = PathBuf::from(env::var("OUT_DIR")?).join("shaders");
    fs::create_dir_all(&out_dir)?;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_1 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, spv) in SHADERS {
        let path = src_dir.join(src);
        println!("cargo:rerun-if-changed={}", path.display());
        let glsl = fs::read_to_string(&path)
            .map_err(|e| format!("reading {}: {e}", path.display()))?;
        let artifact = comp.compile_into_spirv(&glsl, kind, src, "main", Some(&opts))?;
        fs::write(out_dir.join(spv), artifact.as_binary_u8())?;
    }

    // The renderer reads the blobs from here unless the config names
    // another directory.
    println!("cargo:rustc-env=PRISM_SHADER_DIR={}", out_dir.display());
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
