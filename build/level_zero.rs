use super::util;

pub fn link() {
    if let Some(path) = util::get_optional_var_path("LEVEL_ZERO_PATH") {
        for lib in ["lib", "lib64"] {
            println!("cargo:rustc-link-search=native={}", path.join(lib).display());
        }
    }

    println!("cargo:rustc-link-lib=dylib=ze_loader");
}
