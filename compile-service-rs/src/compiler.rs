// compile-service-rs/src/compiler.rs
// Invokes the external pdflatex binary with a bounded timeout.
//
// Success is detected by the presence of the output PDF, not by exit code:
// some pdflatex failure modes exit 0 while leaving only a partial log.

use std::env;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

pub const SOURCE_FILENAME: &str = "main.tex";
pub const ARTIFACT_FILENAME: &str = "main.pdf";
pub const LOG_FILENAME: &str = "main.log";

const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 30;

/// Errors from the invocation machinery itself. Compile failures of the
/// document are not errors here; they are reported as `CompileOutcome::Failure`.
#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("failed to write source file: {0}")]
    WriteSource(String),
    #[error("failed to run compiler: {0}")]
    Spawn(String),
    #[error("failed to read artifact: {0}")]
    ReadArtifact(String),
}

#[derive(Debug)]
pub enum CompileOutcome {
    Success(Vec<u8>),
    Failure { log_text: String },
}

/// Seam between the retry loop and the real process-spawning compiler, so
/// the loop can be exercised with scripted doubles.
#[async_trait]
pub trait TexCompiler: Send + Sync {
    async fn compile(&self, workdir: &Path, source: &str)
        -> Result<CompileOutcome, CompilerError>;
}

pub struct PdfLatexCompiler {
    binary: String,
    timeout: Duration,
}

impl PdfLatexCompiler {
    pub fn new(binary: String, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Reads `PDFLATEX_BIN` (default "pdflatex") and `COMPILE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let binary = env::var("PDFLATEX_BIN").unwrap_or_else(|_| "pdflatex".to_string());
        let timeout = Duration::from_secs(config_rs::get_env_parsed(
            "COMPILE_TIMEOUT_SECS",
            DEFAULT_COMPILE_TIMEOUT_SECS,
        ));
        Self::new(binary, timeout)
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// True when the compiler binary resolves: either an explicit path to an
    /// existing file, or a bare name found in one of the PATH entries.
    pub fn is_available(&self) -> bool {
        let candidate = Path::new(&self.binary);
        if candidate.components().count() > 1 {
            return candidate.is_file();
        }

        env::var_os("PATH")
            .map(|paths| env::split_paths(&paths).any(|dir| dir.join(&self.binary).is_file()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TexCompiler for PdfLatexCompiler {
    async fn compile(
        &self,
        workdir: &Path,
        source: &str,
    ) -> Result<CompileOutcome, CompilerError> {
        let source_path = workdir.join(SOURCE_FILENAME);
        tokio::fs::write(&source_path, source)
            .await
            .map_err(|e| CompilerError::WriteSource(format!("{}: {}", source_path.display(), e)))?;

        let mut command = Command::new(&self.binary);
        command
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("-output-directory")
            .arg(workdir)
            .arg(SOURCE_FILENAME)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::info!("running {} in {}", self.binary, workdir.display());

        let child = command
            .spawn()
            .map_err(|e| CompilerError::Spawn(format!("{}: {}", self.binary, e)))?;

        let captured_stdout = match tokio::time::timeout(self.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => {
                log::debug!(
                    "compiler exited with status {}",
                    output.status.code().unwrap_or(-1)
                );
                String::from_utf8_lossy(&output.stdout).to_string()
            }
            Ok(Err(e)) => {
                return Err(CompilerError::Spawn(format!(
                    "failed waiting for compiler: {}",
                    e
                )))
            }
            Err(_) => {
                // kill_on_drop reaps the child when the output future is dropped.
                log::warn!("compiler timed out after {:?}", self.timeout);
                format!(
                    "! Compilation timed out after {} seconds and was aborted.",
                    self.timeout.as_secs()
                )
            }
        };

        let artifact_path = workdir.join(ARTIFACT_FILENAME);
        if artifact_path.exists() {
            let bytes = tokio::fs::read(&artifact_path).await.map_err(|e| {
                CompilerError::ReadArtifact(format!("{}: {}", artifact_path.display(), e))
            })?;
            return Ok(CompileOutcome::Success(bytes));
        }

        // The .log file, when present, is the authoritative diagnostic
        // source; captured stdout is the fallback.
        let log_path = workdir.join(LOG_FILENAME);
        let log_text = match tokio::fs::read_to_string(&log_path).await {
            Ok(text) => text,
            Err(_) => captured_stdout,
        };

        Ok(CompileOutcome::Failure { log_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_available_with_explicit_path() {
        let compiler = PdfLatexCompiler::new("/bin/sh".to_string(), Duration::from_secs(5));
        assert!(compiler.is_available());

        let missing =
            PdfLatexCompiler::new("/no/such/binary-here".to_string(), Duration::from_secs(5));
        assert!(!missing.is_available());
    }

    #[test]
    fn test_is_available_resolves_bare_name_on_path() {
        let compiler = PdfLatexCompiler::new("sh".to_string(), Duration::from_secs(5));
        assert!(compiler.is_available());

        let missing = PdfLatexCompiler::new(
            "definitely-not-a-real-compiler".to_string(),
            Duration::from_secs(5),
        );
        assert!(!missing.is_available());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let compiler = PdfLatexCompiler::new(
            "/no/such/binary-here".to_string(),
            Duration::from_secs(5),
        );
        let dir = tempfile::tempdir().unwrap();
        let result = compiler.compile(dir.path(), "\\documentclass{article}").await;
        assert!(matches!(result, Err(CompilerError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_zero_exit_without_artifact_is_failure() {
        // `true` exits 0 but produces neither a PDF nor a log, which must
        // still count as a failed attempt.
        let compiler = PdfLatexCompiler::new("true".to_string(), Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let result = compiler
            .compile(dir.path(), "\\documentclass{article}")
            .await
            .unwrap();
        match result {
            CompileOutcome::Failure { log_text } => assert!(log_text.is_empty()),
            CompileOutcome::Success(_) => panic!("expected failure without artifact"),
        }
    }
}
