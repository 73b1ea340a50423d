//! Template Renderer (component A). Substitutes the closed set of
//! placeholders in the hook-library source tree, builds it, and locates the
//! resulting shared object.
//!
//! Grounded on the original prototype's `code_injector.py`: copy every
//! source file to a scratch directory, do literal substitution, clear any
//! placeholder nothing matched, invoke the external build, move the
//! artifact out.

use crate::config::{BacktraceMethod, ResolvedArgs, TimestampMethod};
use crate::errors::HookError;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// The closed set of placeholder tokens the hook-library template contains.
/// Order mirrors `hook-template/src/lib.rs`.
pub struct Placeholders {
    pub size_range_filter: String,
    pub exact_size_filter: String,
    pub buffer_constructor: String,
    pub backtrace_method: String,
    pub timestamp_method: String,
}

impl Placeholders {
    pub fn from_args(args: &ResolvedArgs, shm_name: &str) -> Self {
        Placeholders {
            size_range_filter: render_size_range_filter(&args.filter_size_range),
            exact_size_filter: render_exact_size_filter(&args.filter_size),
            buffer_constructor: format!(
                "RingWriter::create({shm_name:?}, {})",
                args.ring_capacity
            ),
            backtrace_method: render_backtrace_method(args.backtrace_method),
            timestamp_method: render_timestamp_method(args.timestamp_method),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("<<<SIZE_RANGE_FILTER>>>", &self.size_range_filter),
            ("<<<EXACT_SIZE_FILTER>>>", &self.exact_size_filter),
            ("<<<BUFFER_CONSTRUCTOR>>>", &self.buffer_constructor),
            ("<<<BACKTRACE_METHOD>>>", &self.backtrace_method),
            ("<<<TIMESTAMP_METHOD>>>", &self.timestamp_method),
        ]
    }
}

fn render_size_range_filter(ranges: &[(u64, u64)]) -> String {
    if ranges.is_empty() {
        return "true".to_string();
    }
    ranges
        .iter()
        .map(|(min, max)| format!("(size >= {min} && size <= {max})"))
        .collect::<Vec<_>>()
        .join(" || ")
}

fn render_exact_size_filter(sizes: &[u64]) -> String {
    if sizes.is_empty() {
        return "true".to_string();
    }
    sizes
        .iter()
        .map(|size| format!("size == {size}"))
        .collect::<Vec<_>>()
        .join(" || ")
}

fn render_backtrace_method(method: BacktraceMethod) -> String {
    match method {
        BacktraceMethod::Fast => {
            "{ let mut frames = [0u64; wire::BACKTRACE_CAPACITY]; \
             let len = unsafe { backtrace_fast::frame_pointer_walk(&mut frames) }; \
             (frames, len) }"
                .to_string()
        }
        BacktraceMethod::Platform => {
            "{ let mut frames = [0u64; wire::BACKTRACE_CAPACITY]; \
             let len = unsafe { backtrace_fast::platform_unwind(&mut frames) }; \
             (frames, len) }"
                .to_string()
        }
    }
}

fn render_timestamp_method(method: TimestampMethod) -> String {
    match method {
        TimestampMethod::Cycle => "unsafe { core::arch::x86_64::_rdtsc() }".to_string(),
        TimestampMethod::Monotonic => {
            "{ let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 }; \
             unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) }; \
             ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64 }"
                .to_string()
        }
        TimestampMethod::None => "0".to_string(),
    }
}

/// Renders the template, builds it, and returns the path to the compiled
/// shared object.
pub fn render_and_build(
    template_dir: &Path,
    scratch_dir: &Path,
    placeholders: &Placeholders,
    cargo_path: &str,
) -> Result<PathBuf, HookError> {
    copy_tree(template_dir, scratch_dir)
        .map_err(|e| HookError::BuildFailure(format!("copying template tree failed: {e}")))?;
    substitute_in_tree(scratch_dir, placeholders)
        .map_err(|e| HookError::BuildFailure(format!("placeholder substitution failed: {e}")))?;

    let status = Command::new(cargo_path)
        .args(["build", "--release"])
        .current_dir(scratch_dir)
        .status()
        .map_err(|e| HookError::BuildFailure(format!("failed to spawn {cargo_path}: {e}")))?;
    if !status.success() {
        return Err(HookError::BuildFailure(format!(
            "build exited with {status}"
        )));
    }

    locate_artifact(scratch_dir)
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).expect("walked under src");
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn substitute_in_tree(dir: &Path, placeholders: &Placeholders) -> std::io::Result<()> {
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            continue;
        }
        let mut contents = fs::read_to_string(path)?;
        for (placeholder, snippet) in placeholders.entries() {
            contents = contents.replace(placeholder, snippet);
        }
        // Any placeholder the caller didn't supply a value for is cleared,
        // rather than left as dead literal text in the compiled hook.
        contents = clear_unmatched_placeholders(&contents);
        fs::write(path, contents)?;
    }
    Ok(())
}

fn clear_unmatched_placeholders(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut rest = contents;
    while let Some(start) = rest.find("<<<") {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        if let Some(end) = rest.find(">>>") {
            rest = &rest[end + 3..];
        } else {
            break;
        }
    }
    out.push_str(rest);
    out
}

fn locate_artifact(scratch_dir: &Path) -> Result<PathBuf, HookError> {
    let release_dir = scratch_dir.join("target").join("release");
    for entry in fs::read_dir(&release_dir).map_err(|e| {
        HookError::BuildFailure(format!("could not read {}: {e}", release_dir.display()))
    })? {
        let entry = entry.map_err(|e| HookError::BuildFailure(e.to_string()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".so") || name.ends_with(".dylib") {
            return Ok(entry.path());
        }
    }
    Err(HookError::BuildFailure(format!(
        "no shared object found under {}",
        release_dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_range_filter_renders_disjunction() {
        let rendered = render_size_range_filter(&[(16, 32), (100, 200)]);
        assert_eq!(rendered, "(size >= 16 && size <= 32) || (size >= 100 && size <= 200)");
    }

    #[test]
    fn empty_filters_render_as_always_true() {
        assert_eq!(render_size_range_filter(&[]), "true");
        assert_eq!(render_exact_size_filter(&[]), "true");
    }

    #[test]
    fn exact_size_filter_renders_disjunction() {
        assert_eq!(render_exact_size_filter(&[16, 32]), "size == 16 || size == 32");
    }

    #[test]
    fn unmatched_placeholder_is_cleared() {
        let src = "let x = <<<SOMETHING_UNSET>>>;\nlet y = 1;\n";
        assert_eq!(clear_unmatched_placeholders(src), "let x = ;\nlet y = 1;\n");
    }

    #[test]
    fn copy_tree_preserves_relative_layout() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested").join("a.rs"), "fn a() {}").unwrap();
        fs::write(src.path().join("top.rs"), "fn top() {}").unwrap();
        copy_tree(src.path(), dst.path()).unwrap();
        assert!(dst.path().join("nested").join("a.rs").exists());
        assert!(dst.path().join("top.rs").exists());
    }

    #[test]
    fn substitute_in_tree_replaces_all_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("lib.rs"),
            "fn f() -> bool { <<<SIZE_RANGE_FILTER>>> }",
        )
        .unwrap();
        let placeholders = Placeholders {
            size_range_filter: "size > 0".to_string(),
            exact_size_filter: "true".to_string(),
            buffer_constructor: "noop()".to_string(),
            backtrace_method: "(frames, 0)".to_string(),
            timestamp_method: "0".to_string(),
        };
        substitute_in_tree(dir.path(), &placeholders).unwrap();
        let rendered = fs::read_to_string(dir.path().join("lib.rs")).unwrap();
        assert_eq!(rendered, "fn f() -> bool { size > 0 }");
    }
}
