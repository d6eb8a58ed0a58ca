#[cfg(feature = "cuda")]
mod cuda;
#[cfg(feature = "level-zero")]
mod level_zero;
#[allow(unused)]
mod util;

fn main() {
    println!("cargo:rerun-if-changed=build");

    #[cfg(feature = "cuda")]
    cuda::link();

    #[cfg(feature = "level-zero")]
    level_zero::link();
}
