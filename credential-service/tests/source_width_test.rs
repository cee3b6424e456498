use std::fs;
use std::path::{Path, PathBuf};

const MAX_WIDTH: usize = 100;

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            rust_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

#[test]
fn test_sources_fit_rustfmt_width() -> Result<(), anyhow::Error> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    rust_files(&root.join("src"), &mut files)?;
    rust_files(&root.join("tests"), &mut files)?;
    rust_files(&root.join("../service-core/src"), &mut files)?;

    let mut too_wide = Vec::new();
    for file in &files {
        for (n, line) in fs::read_to_string(file)?.lines().enumerate() {
            if line.chars().count() > MAX_WIDTH {
                too_wide.push(format!("{}:{}", file.display(), n + 1));
            }
        }
    }
    assert!(too_wide.is_empty(), "lines over {} columns: {:?}", MAX_WIDTH, too_wide);
    Ok(())
}
