use std::{env, path::PathBuf};

pub fn get_var_path(name: &str) -> PathBuf {
    println!("cargo:rerun-if-env-changed={name}");

    let path = env::var(name).unwrap_or_else(|e| match e {
        env::VarError::NotPresent => panic!("{name} is not defined"),
        env::VarError::NotUnicode(_) => panic!("{name} contains non-unicode path!"),
    });

    check_exists(name, PathBuf::from(path))
}

pub fn get_optional_var_path(name: &str) -> Option<PathBuf> {
    println!("cargo:rerun-if-env-changed={name}");

    match env::var(name) {
        Ok(path) => Some(check_exists(name, PathBuf::from(path))),
        Err(env::VarError::NotPresent) => None,
        Err(env::VarError::NotUnicode(_)) => panic!("{name} contains non-unicode path!"),
    }
}

fn check_exists(name: &str, path: PathBuf) -> PathBuf {
    if !path.exists() {
        panic!("Path {name}={path:?} does not exist");
    }

    path
}
