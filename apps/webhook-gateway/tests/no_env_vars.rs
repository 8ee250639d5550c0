use std::fs;
use std::path::{Path, PathBuf};

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

/// Only the gateway config and the telemetry bootstrap may read the
/// process environment; libraries take their settings as values.
#[test]
fn libraries_avoid_env_var_reads() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("repo root from manifest dir");

    let mut files = Vec::new();
    for dir in ["libs/core/src", "libs/transform/src", "libs/security/src"] {
        rust_sources(&repo_root.join(dir), &mut files);
    }
    assert!(!files.is_empty(), "no library sources found");

    let offenders: Vec<String> = files
        .iter()
        .filter_map(|file| {
            let text = fs::read_to_string(file).ok()?;
            let hits: Vec<String> = text
                .lines()
                .enumerate()
                .filter(|(_, line)| line.contains("env::var"))
                .map(|(n, line)| format!("{}:{}: {}", file.display(), n + 1, line.trim()))
                .collect();
            (!hits.is_empty()).then(|| hits.join("\n"))
        })
        .collect();
    assert!(offenders.is_empty(), "env::var usage detected:\n{}", offenders.join("\n"));
}
