//! Cold-build and rebuild-on-edit seed scenarios against a real, trivial
//! cdylib fixture crate compiled with `cargo build --release`.

use std::path::PathBuf;

use agentforge_engine::build::BuildPlanner;
use agentforge_engine::cache::BuildCache;
use agentforge_engine::config::BuildConfig;
use agentforge_engine::paths::UserDirectories;

fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/trivial_plugin")
}

fn isolated_dirs(label: &str) -> UserDirectories {
    let root = std::env::temp_dir().join(format!("afe-build-it-{label}-{}", uuid::Uuid::new_v4()));
    std::env::set_var("AFE_HOME", &root);
    let dirs = UserDirectories::new().unwrap();
    dirs.ensure().unwrap();
    dirs
}

#[tokio::test]
#[serial_test::serial(afe_home)]
async fn cold_build_then_second_build_is_fully_cached() {
    let dirs = isolated_dirs("cold");
    let cache_path = dirs.cache_file();
    let planner = BuildPlanner::new(dirs.clone(), BuildConfig { timeout: 180, ..Default::default() });

    let mut cache = BuildCache::load(cache_path.clone());
    let built = planner.build_one(&mut cache, "provider", "qwen3", &fixture_dir(), false).await.unwrap();
    assert!(built, "first build must actually compile the fixture");
    assert_eq!(cache.entry("provider", "qwen3").unwrap().build_count, 1);
    cache.save().unwrap();

    let mut cache = BuildCache::load(cache_path);
    let built_again = planner.build_one(&mut cache, "provider", "qwen3", &fixture_dir(), false).await.unwrap();
    assert!(!built_again, "second build with unchanged sources must reuse the cache");

    std::fs::remove_dir_all(dirs.root()).ok();
    std::fs::remove_dir_all(fixture_dir().join("target")).ok();
}

#[tokio::test]
#[serial_test::serial(afe_home)]
async fn editing_a_source_byte_triggers_rebuild() {
    let dirs = isolated_dirs("edit");
    let cache_path = dirs.cache_file();
    let planner = BuildPlanner::new(dirs.clone(), BuildConfig { timeout: 180, ..Default::default() });

    let mut cache = BuildCache::load(cache_path.clone());
    planner.build_one(&mut cache, "agent", "echo", &fixture_dir(), false).await.unwrap();
    cache.save().unwrap();

    let lib_path = fixture_dir().join("src/lib.rs");
    let original = std::fs::read_to_string(&lib_path).unwrap();
    std::fs::write(&lib_path, format!("{original}\n// touched\n")).unwrap();

    let mut cache = BuildCache::load(cache_path);
    let (needs_rebuild, reason) = cache.should_rebuild("agent", "echo", &fixture_dir());
    assert!(needs_rebuild);
    assert_eq!(reason, "source modified");

    let built = planner.build_one(&mut cache, "agent", "echo", &fixture_dir(), false).await.unwrap();
    assert!(built);

    std::fs::write(&lib_path, original).unwrap();
    std::fs::remove_dir_all(dirs.root()).ok();
    std::fs::remove_dir_all(fixture_dir().join("target")).ok();
}
