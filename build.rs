fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=schemas");

    // Record build-time information (git hash, compiler, build time) for the
    // summary printed by the cli.
    built::write_built_file().expect("Failed to acquire build-time information");
}
