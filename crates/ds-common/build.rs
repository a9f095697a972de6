//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "build"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Build metadata emission for version reporting."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    EmitBuilder::builder().all_build().all_cargo().emit()?;

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
