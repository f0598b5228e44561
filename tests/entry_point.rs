//! The zero-argument entry point, driven through `SITE_PATCHER_PATH`.
//!
//! Kept in its own test binary since it sets process environment.

use site_patcher::apply_all_fixes;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use walkdir::WalkDir;

const MODULE_FILES: [&str; 3] = [
    "diffusers/utils/dynamic_modules_utils.py",
    "huggingface_hub/file_download.py",
    "diffusers/utils/outputs.py",
];

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn site_packages() -> TempDir {
    let dir = TempDir::new().unwrap();
    let source = fixtures().join("site-packages");
    for entry in WalkDir::new(&source) {
        let entry = entry.unwrap();
        let target = dir.path().join(entry.path().strip_prefix(&source).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::copy(entry.path(), &target).unwrap();
        }
    }
    dir
}

#[test]
fn apply_all_fixes_patches_then_leaves_files_alone() {
    let site = site_packages();
    std::env::set_var("SITE_PATCHER_PATH", site.path());
    std::env::remove_var("SITE_PATCHER_PYTHON");

    apply_all_fixes();

    let mut patched = Vec::new();
    for relative in MODULE_FILES {
        let actual = fs::read_to_string(site.path().join(relative)).unwrap();
        let expected = fs::read_to_string(fixtures().join("expected").join(relative)).unwrap();
        assert_eq!(actual, expected, "{relative}");
        let modified = fs::metadata(site.path().join(relative))
            .unwrap()
            .modified()
            .unwrap();
        patched.push((actual, modified));
    }

    apply_all_fixes();

    for (relative, (before, modified)) in MODULE_FILES.iter().zip(&patched) {
        let path = site.path().join(relative);
        assert_eq!(&fs::read_to_string(&path).unwrap(), before, "{relative}");
        assert_eq!(
            &fs::metadata(&path).unwrap().modified().unwrap(),
            modified,
            "{relative} rewritten on second run"
        );
    }

    std::env::remove_var("SITE_PATCHER_PATH");
}
