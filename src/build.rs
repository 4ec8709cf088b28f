use std::path::{Path, PathBuf};
use std::process::Command;

use ignore::WalkBuilder;
use toml_edit::DocumentMut;

use crate::error::Error;

/// Copy the user's project into a staging directory, respecting .gitignore
/// and skipping the `target/` directory.
pub fn prepare_staging(project_root: &Path, staging_dir: &Path) -> Result<(), Error> {
    let walker = WalkBuilder::new(project_root)
        .hidden(false)
        .follow_links(true)
        .filter_entry(|entry| {
            // Skip target/ only at the project root level (depth 1).
            entry.depth() != 1 || entry.file_name().to_string_lossy() != "target"
        })
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let source = entry.path();
        let relative = source
            .strip_prefix(project_root)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let dest = staging_dir.join(relative);

        if entry.file_type().is_some_and(|ft| ft.is_dir()) {
            std::fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_some_and(|ft| ft.is_file()) {
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(source, &dest)?;
        }
    }

    Ok(())
}

/// How to reference takt-runtime in the staged Cargo.toml.
pub enum RuntimeSource<'a> {
    /// Published crate version (e.g. "0.1.0").
    Version(&'a str),
    /// Local path (for development before publishing).
    Path(&'a Path),
}

/// Add `takt-runtime` as a dependency in the staged project's Cargo.toml,
/// preserving the manifest's existing formatting.
pub fn inject_runtime_dependency(
    staging_dir: &Path,
    source: RuntimeSource<'_>,
) -> Result<(), Error> {
    let cargo_toml_path = staging_dir.join("Cargo.toml");
    let content = std::fs::read_to_string(&cargo_toml_path)?;

    let mut doc: DocumentMut = content
        .parse::<DocumentMut>()
        .map_err(|e| Error::BuildFailed(format!("failed to parse Cargo.toml: {e}")))?;

    if !doc.contains_table("dependencies") {
        doc["dependencies"] = toml_edit::Item::Table(toml_edit::Table::new());
    }

    match source {
        RuntimeSource::Version(v) => {
            doc["dependencies"]["takt-runtime"] = toml_edit::value(v);
        }
        RuntimeSource::Path(p) => {
            let mut table = toml_edit::InlineTable::new();
            table.insert("path", p.to_string_lossy().as_ref().into());
            doc["dependencies"]["takt-runtime"] =
                toml_edit::Item::Value(toml_edit::Value::InlineTable(table));
        }
    }

    std::fs::write(&cargo_toml_path, doc.to_string())?;

    Ok(())
}

/// Find the binary entry point for a Cargo project.
///
/// Resolves using Cargo's rules: a `[[bin]]` entry with an explicit `path`
/// wins, then `[[bin]]` names inferred as `src/bin/<name>.rs` or
/// `src/bin/<name>/main.rs`, then the `src/main.rs` default.
pub fn find_bin_entry_point(project_dir: &Path) -> Result<PathBuf, Error> {
    let content = std::fs::read_to_string(project_dir.join("Cargo.toml"))?;
    let doc: DocumentMut = content
        .parse::<DocumentMut>()
        .map_err(|e| Error::BuildFailed(format!("failed to parse Cargo.toml: {e}")))?;

    if let Some(bins) = doc.get("bin").and_then(|b| b.as_array_of_tables()) {
        for bin in bins {
            if let Some(path) = bin.get("path").and_then(|p| p.as_str()) {
                return Ok(PathBuf::from(path));
            }
        }
        for bin in bins {
            if let Some(name) = bin.get("name").and_then(|n| n.as_str()) {
                let single_file = PathBuf::from("src").join("bin").join(format!("{name}.rs"));
                if project_dir.join(&single_file).exists() {
                    return Ok(single_file);
                }
                let dir_main = PathBuf::from("src").join("bin").join(name).join("main.rs");
                if project_dir.join(&dir_main).exists() {
                    return Ok(dir_main);
                }
            }
        }
    }

    let default = PathBuf::from("src").join("main.rs");
    if project_dir.join(&default).exists() {
        return Ok(default);
    }

    Err(Error::BuildFailed(format!(
        "could not find binary entry point: no [[bin]] path in Cargo.toml and {} does not exist",
        project_dir.join(&default).display()
    )))
}

/// Build the instrumented binary using `cargo build --message-format=json`.
/// Returns the path to the compiled executable.
pub fn build_instrumented(staging_dir: &Path, target_dir: &Path) -> Result<PathBuf, Error> {
    // Remove RUSTUP_TOOLCHAIN so the target project's rust-toolchain.toml
    // is respected rather than the toolchain takt itself was launched with.
    let output = Command::new("cargo")
        .arg("build")
        .arg("--message-format=json")
        .env("CARGO_TARGET_DIR", target_dir)
        .env_remove("RUSTUP_TOOLCHAIN")
        .current_dir(staging_dir)
        .output()?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let rendered = extract_rendered_errors(&stdout);
        if rendered.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::BuildFailed(stderr.into_owned()));
        }
        return Err(Error::BuildFailed(rendered.join("")));
    }

    // Cargo emits dependencies first; the project's own binary comes last.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut binary_path = None;
    for line in stdout.lines() {
        let Ok(msg) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if msg.get("reason").and_then(|r| r.as_str()) == Some("compiler-artifact")
            && let Some(exe) = msg.get("executable").and_then(|e| e.as_str())
        {
            binary_path = Some(PathBuf::from(exe));
        }
    }

    binary_path
        .ok_or_else(|| Error::BuildFailed("no executable found in cargo build output".into()))
}

/// Extract human-readable compiler errors from cargo's JSON output.
fn extract_rendered_errors(json_output: &str) -> Vec<String> {
    json_output
        .lines()
        .filter_map(|line| {
            let msg: serde_json::Value = serde_json::from_str(line).ok()?;
            if msg.get("reason")?.as_str()? != "compiler-message" {
                return None;
            }
            msg.get("message")?
                .get("rendered")?
                .as_str()
                .map(String::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn create_file(base: &Path, relative: &str, content: &str) {
        let path = base.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn staging_copies_project_and_skips_target() {
        let project = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        create_file(project.path(), "Cargo.toml", "[package]\nname = \"demo\"");
        create_file(project.path(), "src/main.rs", "fn main() {}");
        create_file(project.path(), "src/walker/mod.rs", "pub fn walk() {}");
        create_file(project.path(), "target/debug/demo", "binary-content");

        prepare_staging(project.path(), staging.path()).unwrap();

        assert!(staging.path().join("Cargo.toml").exists());
        assert!(staging.path().join("src/main.rs").exists());
        assert!(staging.path().join("src/walker/mod.rs").exists());
        assert!(!staging.path().join("target").exists());
    }

    #[test]
    fn inject_dependency_adds_takt_runtime() {
        let staging = TempDir::new().unwrap();
        create_file(
            staging.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[dependencies]\nserde = \"1\"\n",
        );

        inject_runtime_dependency(staging.path(), RuntimeSource::Version("0.1.0")).unwrap();

        let result = std::fs::read_to_string(staging.path().join("Cargo.toml")).unwrap();
        let doc: DocumentMut = result.parse().unwrap();
        assert_eq!(doc["dependencies"]["takt-runtime"].as_str(), Some("0.1.0"));
        assert_eq!(doc["dependencies"]["serde"].as_str(), Some("1"));
    }

    #[test]
    fn inject_dependency_creates_section_if_missing() {
        let staging = TempDir::new().unwrap();
        create_file(
            staging.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        );

        inject_runtime_dependency(staging.path(), RuntimeSource::Version("0.2.0")).unwrap();

        let result = std::fs::read_to_string(staging.path().join("Cargo.toml")).unwrap();
        let doc: DocumentMut = result.parse().unwrap();
        assert_eq!(doc["dependencies"]["takt-runtime"].as_str(), Some("0.2.0"));
    }

    #[test]
    fn inject_dependency_as_local_path() {
        let staging = TempDir::new().unwrap();
        create_file(
            staging.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        );

        inject_runtime_dependency(staging.path(), RuntimeSource::Path(Path::new("/dev/takt")))
            .unwrap();

        let result = std::fs::read_to_string(staging.path().join("Cargo.toml")).unwrap();
        let doc: DocumentMut = result.parse().unwrap();
        let dep = doc["dependencies"]["takt-runtime"].as_inline_table().unwrap();
        assert_eq!(dep.get("path").and_then(|p| p.as_str()), Some("/dev/takt"));
    }

    #[test]
    fn extract_compiler_errors_from_json() {
        let json_lines = concat!(
            r#"{"reason":"compiler-message","message":{"rendered":"error[E0308]: mismatched types\n --> src/main.rs:2:5\n"}}"#,
            "\n",
            r#"{"reason":"compiler-message","message":{"rendered":"error: aborting due to previous error\n"}}"#,
            "\n",
            r#"{"reason":"build-finished","success":false}"#,
        );
        let errors = extract_rendered_errors(json_lines);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("mismatched types"));
    }

    #[test]
    fn find_bin_entry_point_with_explicit_path() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[[bin]]\nname = \"demo\"\npath = \"src/custom/app.rs\"\n",
        );
        create_file(tmp.path(), "src/custom/app.rs", "fn main() {}");

        let result = find_bin_entry_point(tmp.path()).unwrap();
        assert_eq!(result, PathBuf::from("src/custom/app.rs"));
    }

    #[test]
    fn find_bin_entry_point_infers_from_name() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[[bin]]\nname = \"mytool\"\n",
        );
        create_file(tmp.path(), "src/bin/mytool.rs", "fn main() {}");

        let result = find_bin_entry_point(tmp.path()).unwrap();
        assert_eq!(result, PathBuf::from("src/bin/mytool.rs"));
    }

    #[test]
    fn find_bin_entry_point_defaults_to_src_main() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        );
        create_file(tmp.path(), "src/main.rs", "fn main() {}");

        let result = find_bin_entry_point(tmp.path()).unwrap();
        assert_eq!(result, PathBuf::from("src/main.rs"));
    }

    #[test]
    fn find_bin_entry_point_errors_when_no_entry_found() {
        let tmp = TempDir::new().unwrap();
        create_file(
            tmp.path(),
            "Cargo.toml",
            "[package]\nname = \"demo\"\nversion = \"0.1.0\"\n",
        );

        let result = find_bin_entry_point(tmp.path());
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("could not find binary entry point"),
            "unexpected error: {err_msg}"
        );
    }
}
