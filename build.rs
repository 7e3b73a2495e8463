// Build script to compile GLSL shaders to SPIR-V

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADERS: &[&str] = &["quad.vert", "quad.frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    // Compile shaders using glslc (part of Vulkan SDK)
    for name in SHADERS {
        let input = Path::new("shaders").join(name);
        let output = out_dir.join(format!("{name}.spv"));
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &Path, output: &Path) {
    let result = Command::new("glslc")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            // Leave an empty blob behind so include_bytes! still resolves;
            // pipeline creation reports the missing bytecode at runtime.
            println!("cargo:warning=glslc not found ({e}), {} not compiled", input.display());
            println!(
                "cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}",
                input.display(),
                output.display()
            );
            fs::write(output, []).expect("write placeholder shader");
        }
    }
}
