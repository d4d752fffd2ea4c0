use std::fs;
use std::path::{Path, PathBuf};

const ALLOWED_STATUS_WRITERS: &[&str] = &["src/manager.rs"];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

#[test]
fn order_status_writes_are_limited_to_the_manager() {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let src_root = repo_root.join("src");
    let mut files = Vec::new();
    collect_rust_files(&src_root, &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let content = fs::read_to_string(&file).unwrap_or_default();
        // Unit-test fixtures below the test marker may set up arbitrary
        // states; only production code is held to the rule.
        let production = content
            .split("#[cfg(test)]")
            .next()
            .unwrap_or(&content);
        for (idx, line) in production.lines().enumerate() {
            let trimmed = line.trim();
            if !trimmed.contains(".status = ") {
                continue;
            }
            if ALLOWED_STATUS_WRITERS.iter().any(|allowed| *allowed == rel) {
                continue;
            }
            offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
        }
    }

    assert!(
        offenders.is_empty(),
        "order status written outside the single writer:\n{}",
        offenders.join("\n")
    );
}
