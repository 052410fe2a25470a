// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed external-process steps with a uniform timeout.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use scanwerk_core::error::{Result, ScanwerkError};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Longest slice of combined output kept in an error message.
const OUTPUT_EXCERPT: usize = 512;

/// One external command: program, arguments, optional stdin file, and the
/// file it is expected to produce.
#[derive(Debug, Clone)]
pub struct ProcessStep {
    pub name: &'static str,
    pub program: String,
    pub args: Vec<OsString>,
    pub stdin: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub timeout: Duration,
}

impl ProcessStep {
    pub fn new(name: &'static str, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name,
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            output: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str().to_owned())
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn produces(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Run to completion. The child is killed if the timeout elapses.
    #[instrument(skip(self), fields(step = self.name, program = %self.program))]
    pub async fn run(&self) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &self.stdin {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|e| {
                    ScanwerkError::step(self.name, format!("cannot open {}: {e}", path.display()))
                })?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| ScanwerkError::step(self.name, format!("cannot start {}: {e}", self.program)))?;

        // Dropping the wait future drops the child, which kills it.
        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ScanwerkError::step(self.name, format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| ScanwerkError::step(self.name, format!("wait failed: {e}")))?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ScanwerkError::step(
                self.name,
                format!("{} ({})", output.status, excerpt(combined.trim())),
            ));
        }

        if let Some(expected) = &self.output
            && !expected.exists()
        {
            return Err(ScanwerkError::step(
                self.name,
                format!("exited cleanly but {} is missing", expected.display()),
            ));
        }

        debug!("step finished");
        Ok(())
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= OUTPUT_EXCERPT {
        return text;
    }
    let mut end = OUTPUT_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str, limit: Duration) -> ProcessStep {
        ProcessStep::new("test", "sh", limit).arg("-c").arg(script)
    }

    #[tokio::test]
    async fn success_is_ok() {
        sh("exit 0", Duration::from_secs(5)).run().await.expect("exit 0");
    }

    #[tokio::test]
    async fn failure_reports_output() {
        let err = sh("echo broken >&2; exit 3", Duration::from_secs(5))
            .run()
            .await
            .expect_err("exit 3");
        let text = err.to_string();
        assert!(text.contains("broken"), "{text}");
        assert!(matches!(err, ScanwerkError::PipelineStep { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let started = Instant::now();
        let err = sh("sleep 30", Duration::from_millis(200))
            .run()
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program() {
        let err = ProcessStep::new("test", "scanwerk-no-such-tool", Duration::from_secs(1))
            .run()
            .await
            .expect_err("not found");
        assert!(err.to_string().contains("cannot start"));
    }

    #[tokio::test]
    async fn stdin_and_expected_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, "hello").expect("write input");

        ProcessStep::new("copy", "sh", Duration::from_secs(5))
            .arg("-c")
            .arg(format!("cat > {}", output.display()))
            .stdin_from(&input)
            .produces(&output)
            .run()
            .await
            .expect("copy through stdin");
        assert_eq!(std::fs::read_to_string(&output).expect("read"), "hello");

        let err = sh("true", Duration::from_secs(5))
            .produces(dir.path().join("never.txt"))
            .run()
            .await
            .expect_err("missing output");
        assert!(err.to_string().contains("missing"));
    }
}
