use common::yaml_include::{load_yaml_with_includes, render_yaml};
use std::{error::Error, fs, io::Write, path::Path};

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=config");
    println!("cargo:rerun-if-env-changed=SHOP_ENV");

    let out_dir = std::env::var("OUT_DIR")?;
    let out_path = Path::new(&out_dir);
    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "debug".to_string());
    let env = std::env::var("SHOP_ENV").unwrap_or_else(|_| "dev".to_string());

    // OUT_DIR lives under target/<profile>/build/...
    let target_dir = out_path
        .ancestors()
        .find(|p| p.ends_with("target"))
        .ok_or("could not find target directory")?
        .join(&profile);

    let total_config_dir = target_dir.join("config");
    let total_config_file_name = total_config_dir.join("total_config.yaml");
    let source_config_dir = Path::new(&std::env::var("CARGO_MANIFEST_DIR")?).join("config");

    println!("cargo:warning=Loading config env {:?} profile {:?}", env, profile);
    let config_yaml = load_yaml_with_includes(&source_config_dir.join(format!("{}.yaml", env)))?;
    let out_str = render_yaml(&config_yaml)?;

    println!("cargo:warning=Writing config to {:?}", total_config_file_name);
    fs::create_dir_all(total_config_dir)?;
    fs::File::create(total_config_file_name)?.write_all(out_str.as_bytes())?;

    Ok(())
}
