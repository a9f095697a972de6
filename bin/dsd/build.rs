//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "build"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Build metadata for the daemon version banner."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder()
        .fail_on_error()
        .all_build()
        .all_cargo()
        .emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
