use super::util;

pub fn link() {
    let cuda_path = util::get_var_path("CUDA_PATH");

    let paths = if cfg!(target_family = "windows") { vec!["lib/x64", "lib"] } else { vec!["lib64", "lib64/stubs"] };
    for path in paths {
        println!("cargo:rustc-link-search=native={}", cuda_path.join(path).display());
    }

    println!("cargo:rerun-if-changed={}", cuda_path.join("include").display());
    println!("cargo:rustc-link-lib=dylib=cuda");
}
