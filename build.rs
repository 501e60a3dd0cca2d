use std::env;

fn main() {
    // Expose the target triple and profile to `Kernel::build_info()`
    let target = env::var("TARGET").unwrap();
    let profile = env::var("PROFILE").unwrap();
    println!("cargo:rustc-env=MODELFRAME_TARGET={}", target);
    println!("cargo:rustc-env=MODELFRAME_PROFILE={}", profile);
    println!("cargo:rerun-if-changed=build.rs");
}
