use std::fs;

use graphics3d::scene::MAX_POINT_LIGHT_COUNT;
use graphics3d::{BackendError, RendererConfig};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("graphics3d-{}-{}", std::process::id(), name))
}

#[test]
fn test_load_config_file() {
    let path = temp_path("renderer.toml");
    fs::write(
        &path,
        r#"
min_block_size = 131072
multisampling = 2
max_point_lights = 32
vsync = false
clear_color = [0.1, 0.2, 0.3, 1.0]
shader_directory = "assets/shaders"
"#,
    )
    .unwrap();

    let config = RendererConfig::load(&path).unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(config.min_block_size, 131072);
    assert_eq!(config.multisampling, 2);
    assert_eq!(config.max_point_lights, MAX_POINT_LIGHT_COUNT);
    assert!(!config.vsync);
    assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
    assert_eq!(
        config.shader_directory.as_deref(),
        Some(std::path::Path::new("assets/shaders"))
    );
    assert_eq!(config.fence_timeout(), RendererConfig::default().fence_timeout());
}

#[test]
fn test_missing_config_file() {
    let result = RendererConfig::load(temp_path("does-not-exist.toml"));
    assert!(matches!(result, Err(BackendError::InitializationFailed(_))));
}

#[test]
fn test_malformed_config_file() {
    let path = temp_path("broken.toml");
    fs::write(&path, "multisampling = \"lots\"\n").unwrap();
    let result = RendererConfig::load(&path);
    fs::remove_file(&path).ok();
    assert!(matches!(result, Err(BackendError::InitializationFailed(_))));
}
