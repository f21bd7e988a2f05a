//! Decompiler capability.
//!
//! Decompilation is injected so the choice between decompiled and direct
//! container analysis is a plain branch on the capability's result. A
//! decompiler counts as successful only if it left at least one regular file
//! in the output directory; exit status alone is not trusted.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, ScanError};

pub trait Decompiler: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Populate `out_dir` with source recovered from `archive`.
    fn decompile(&self, archive: &Path, out_dir: &Path) -> Result<()>;
}

/// Whether `dir` contains at least one regular file anywhere below it.
pub fn has_output(dir: &Path) -> bool {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

/// An external decompiler invoked as a subprocess.
///
/// `{input}` and `{output}` in `args` are replaced with the archive path and
/// the output directory, e.g. `java -jar cfr.jar {input} --outputdir {output}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDecompiler {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandDecompiler {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn expand_args(&self, archive: &Path, out_dir: &Path) -> Vec<String> {
        let input = archive.to_string_lossy();
        let output = out_dir.to_string_lossy();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

impl Decompiler for CommandDecompiler {
    fn name(&self) -> &str {
        &self.program
    }

    fn decompile(&self, archive: &Path, out_dir: &Path) -> Result<()> {
        let args = self.expand_args(archive, out_dir);
        debug!("running {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| ScanError::external_tool(&self.program, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScanError::external_tool(
                &self.program,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        if !has_output(out_dir) {
            return Err(ScanError::external_tool(
                &self.program,
                "exited successfully but produced no files",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_expanded() {
        let d = CommandDecompiler::new(
            "java",
            vec![
                "-jar".into(),
                "cfr.jar".into(),
                "{input}".into(),
                "--outputdir".into(),
                "{output}".into(),
            ],
        );
        let args = d.expand_args(Path::new("/tmp/mod.jar"), Path::new("/tmp/out"));
        assert_eq!(args, vec!["-jar", "cfr.jar", "/tmp/mod.jar", "--outputdir", "/tmp/out"]);
    }

    #[test]
    fn empty_directory_has_no_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        assert!(!has_output(dir.path()));
        std::fs::write(dir.path().join("a/b/X.java"), "class X {}").unwrap();
        assert!(has_output(dir.path()));
    }

    #[test]
    fn missing_program_is_external_failure() {
        let d = CommandDecompiler::new("modscan-no-such-decompiler", vec![]);
        let dir = tempfile::tempdir().unwrap();
        let err = d.decompile(Path::new("x.jar"), dir.path()).unwrap_err();
        assert!(matches!(err, ScanError::ExternalToolFailure { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn zero_exit_without_files_is_failure() {
        let d = CommandDecompiler::new("true", vec![]);
        let dir = tempfile::tempdir().unwrap();
        let err = d.decompile(Path::new("x.jar"), dir.path()).unwrap_err();
        assert!(err.to_string().contains("produced no files"));
    }

    #[cfg(unix)]
    #[test]
    fn command_that_writes_output_succeeds() {
        let d = CommandDecompiler::new(
            "sh",
            vec!["-c".into(), "echo 'class A {}' > {output}/A.java".into()],
        );
        let dir = tempfile::tempdir().unwrap();
        d.decompile(Path::new("x.jar"), dir.path()).unwrap();
        assert!(dir.path().join("A.java").is_file());
    }
}
