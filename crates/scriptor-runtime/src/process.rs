//! External process plumbing shared by the engines.
//!
//! - [`tokenize`] splits a shell-style command line into argv
//! - [`EnvironmentPatch`] applies `set`/`unset` on top of an inherited environment
//! - [`ProcessRunner`] spawns a child, polls it on a fixed interval and kills
//!   it once the polling ceiling is reached

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use scriptor_config::CommandSection;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

/// Errors from [`tokenize`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("trailing escape character")]
    TrailingEscape,

    #[error("empty command line")]
    Empty,
}

/// Split a command line into argv the way a POSIX shell would for simple
/// commands: whitespace separates words, single quotes are literal, double
/// quotes allow `\"` and `\\` escapes, and a bare backslash escapes the next
/// character. No expansion of any kind is performed.
pub fn tokenize(cmdline: &str) -> std::result::Result<Vec<String>, TokenizeError> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = cmdline.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(TokenizeError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\' | '$' | '`')) => current.push(esc),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(TokenizeError::UnterminatedQuote('"')),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(TokenizeError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(ch) => {
                    in_word = true;
                    current.push(ch);
                }
                None => return Err(TokenizeError::TrailingEscape),
            },
            c if c.is_whitespace() => {
                if in_word {
                    argv.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        argv.push(current);
    }
    if argv.is_empty() {
        return Err(TokenizeError::Empty);
    }
    Ok(argv)
}

/// Environment changes applied to a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnvironmentPatch {
    /// Variables to add or overwrite.
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    /// Variables to remove.
    #[serde(default)]
    pub unset: Vec<String>,
}

impl EnvironmentPatch {
    /// Patch that sets exactly `vars`.
    pub fn set_all(vars: BTreeMap<String, String>) -> Self {
        Self {
            set: vars,
            unset: Vec::new(),
        }
    }

    /// Add `vars` beneath this patch; keys this patch already sets win.
    pub fn layered_over(mut self, vars: &BTreeMap<String, String>) -> Self {
        for (key, value) in vars {
            self.set
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Apply to a command that inherits the parent environment: `set`
    /// first, then `unset`.
    ///
    /// Inherited variables are never decoded, so values that are not
    /// valid UTF-8 reach the child unchanged.
    pub fn apply_to(&self, cmd: &mut Command) {
        cmd.envs(&self.set);
        for key in &self.unset {
            cmd.env_remove(key);
        }
    }
}

/// Whether `program` resolves to a file on `PATH` (or is an existing path).
pub fn program_available(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}

/// A process to start.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Changes applied on top of the inherited environment.
    pub env: EnvironmentPatch,
    /// Bytes written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    /// Invocation inheriting the parent environment, with no stdin.
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: EnvironmentPatch::default(),
            stdin: None,
            cwd: None,
        }
    }

    /// Environment changes for the child.
    pub fn with_env(mut self, env: EnvironmentPatch) -> Self {
        self.env = env;
        self
    }

    /// Pipe bytes to stdin.
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run inside `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns processes and polls them up to a fixed ceiling.
///
/// The child is checked every `wait_time` for at most `loop_count`
/// iterations. A child still running after that is killed and the run
/// fails with [`RuntimeError::ProcessTimeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRunner {
    wait_time: Duration,
    loop_count: u32,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::from_config(&CommandSection::default())
    }
}

impl ProcessRunner {
    /// Create a runner polling every `wait_time`, `loop_count` times.
    pub fn new(wait_time: Duration, loop_count: u32) -> Self {
        Self {
            wait_time,
            loop_count: loop_count.max(1),
        }
    }

    /// Runner using the `[command]` polling limits.
    pub fn from_config(section: &CommandSection) -> Self {
        Self::new(
            Duration::from_millis(section.wait_time_ms),
            section.loop_count,
        )
    }

    /// Runner with a ceiling of `timeout`, polled once per second.
    pub fn with_timeout(timeout: Duration) -> Self {
        let poll = Duration::from_secs(1).min(timeout.max(Duration::from_millis(1)));
        let loops = timeout.as_millis().div_ceil(poll.as_millis().max(1));
        Self::new(poll, u32::try_from(loops).unwrap_or(u32::MAX))
    }

    /// Poll interval.
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// Maximum number of polls.
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Total time a child may run.
    pub fn ceiling(&self) -> Duration {
        self.wait_time * self.loop_count
    }

    /// Run the invocation to completion or until the ceiling is hit.
    ///
    /// A non-zero exit is not an error here; callers decide what it means.
    pub async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let Some((program, args)) = invocation.argv.split_first() else {
            return Err(RuntimeError::execution("empty command"));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        invocation.env.apply_to(&mut cmd);
        if let Some(ref dir) = invocation.cwd {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.ceiling();
        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::execution(format!("Failed to start '{program}': {e}")))?;
        debug!(program = %program, pid = ?child.id(), "Process started");

        if let (Some(input), Some(mut stdin)) = (invocation.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                // The child may exit without reading its input.
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let mut stderr_reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let mut status = None;
        for _ in 0..self.loop_count {
            match tokio::time::timeout(self.wait_time, child.wait()).await {
                Ok(Ok(s)) => {
                    status = Some(s);
                    break;
                }
                Ok(Err(e)) => {
                    stdout_reader.abort();
                    stderr_reader.abort();
                    return Err(RuntimeError::execution(format!(
                        "Failed to wait for '{program}': {e}"
                    )));
                }
                Err(_) => continue,
            }
        }

        let Some(status) = status else {
            if let Err(e) = child.kill().await {
                warn!(program = %program, error = %e, "Failed to kill timed out process");
            }
            stdout_reader.abort();
            stderr_reader.abort();
            warn!(program = %program, ceiling = ?self.ceiling(), "Process timed out");
            return Err(RuntimeError::ProcessTimeout(self.ceiling()));
        };

        // Descendants can hold the pipes open after the child exits; the
        // ceiling covers output collection as well.
        let collected = tokio::time::timeout_at(deadline, async {
            let stdout = (&mut stdout_reader).await.unwrap_or_default();
            let stderr = (&mut stderr_reader).await.unwrap_or_default();
            (stdout, stderr)
        })
        .await;
        let Ok((stdout, stderr)) = collected else {
            stdout_reader.abort();
            stderr_reader.abort();
            warn!(
                program = %program,
                ceiling = ?self.ceiling(),
                "Process output still open at ceiling"
            );
            return Err(RuntimeError::ProcessTimeout(self.ceiling()));
        };
        let output = ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code().unwrap_or(-1),
            elapsed: start.elapsed(),
        };
        debug!(
            program = %program,
            exit_code = output.exit_code,
            elapsed = ?output.elapsed,
            "Process finished"
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_plain_words() {
        assert_eq!(
            tokenize("ls -la  /tmp").unwrap(),
            argv(&["ls", "-la", "/tmp"])
        );
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(
            tokenize(r#"echo 'single $HOME' "double \"q\"" mid"dle"x"#).unwrap(),
            argv(&["echo", "single $HOME", "double \"q\"", "middlex"])
        );
        assert_eq!(tokenize("echo ''").unwrap(), argv(&["echo", ""]));
    }

    #[test]
    fn test_tokenize_backslash() {
        assert_eq!(
            tokenize(r"touch my\ file").unwrap(),
            argv(&["touch", "my file"])
        );
        assert_eq!(
            tokenize(r#"printf "a\nb""#).unwrap(),
            argv(&["printf", r"a\nb"])
        );
    }

    #[test]
    fn test_tokenize_errors() {
        assert_eq!(
            tokenize("echo 'oops"),
            Err(TokenizeError::UnterminatedQuote('\''))
        );
        assert_eq!(
            tokenize("echo \"oops"),
            Err(TokenizeError::UnterminatedQuote('"'))
        );
        assert_eq!(tokenize("echo \\"), Err(TokenizeError::TrailingEscape));
        assert_eq!(tokenize("   "), Err(TokenizeError::Empty));
    }

    #[test]
    fn test_environment_patch_layering() {
        let request: BTreeMap<String, String> = [("A", "1"), ("B", "2")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let patch = EnvironmentPatch {
            set: [("B".to_string(), "20".to_string())].into_iter().collect(),
            unset: vec!["C".to_string()],
        }
        .layered_over(&request);
        assert_eq!(patch.set["A"], "1");
        assert_eq!(patch.set["B"], "20");
        assert_eq!(patch.unset, ["C"]);
    }

    #[test]
    fn test_runner_ceiling() {
        let runner = ProcessRunner::from_config(&CommandSection::default());
        assert_eq!(runner.wait_time(), Duration::from_millis(1000));
        assert_eq!(runner.loop_count(), 30);
        assert_eq!(runner.ceiling(), Duration::from_secs(30));

        let runner = ProcessRunner::with_timeout(Duration::from_secs(5));
        assert_eq!(runner.ceiling(), Duration::from_secs(5));
    }

    #[test]
    fn test_program_available() {
        assert!(!program_available("definitely-not-a-real-program-4711"));
    }

    #[tokio::test]
    async fn test_empty_argv_rejected() {
        let runner = ProcessRunner::default();
        let err = runner.run(&Invocation::new(vec![])).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Execution(_)));
    }

    #[tokio::test]
    async fn test_run_captures_output_and_env() {
        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        let runner = ProcessRunner::new(Duration::from_millis(100), 50);
        let env = EnvironmentPatch {
            set: [("GREETING".to_string(), "hi".to_string())].into_iter().collect(),
            unset: vec!["HOME".to_string()],
        };
        let inv = Invocation::new(argv(&[
            "sh",
            "-c",
            "cat; echo \"$GREETING\"; echo \"${HOME:-unset}\"; echo err >&2",
        ]))
        .with_env(env)
        .with_stdin("from stdin\n");
        let out = runner.run(&inv).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "from stdin\nhi\nunset\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_inherited_variable_reaches_child() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        unsafe { std::env::set_var("SCRIPTOR_TEST_RAW_BYTES", OsStr::from_bytes(b"\xff\xfe")) };

        let runner = ProcessRunner::new(Duration::from_millis(100), 50);
        let inv = Invocation::new(argv(&[
            "sh",
            "-c",
            "test -n \"$SCRIPTOR_TEST_RAW_BYTES\" && echo present",
        ]))
        .with_env(EnvironmentPatch::set_all(
            [("OTHER".to_string(), "1".to_string())].into_iter().collect(),
        ));
        let out = runner.run(&inv).await.unwrap();
        assert_eq!(out.stdout, "present\n");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        let runner = ProcessRunner::new(Duration::from_millis(100), 50);
        let inv = Invocation::new(argv(&["sh", "-c", "exit 7"]));
        let out = runner.run(&inv).await.unwrap();
        assert_eq!(out.exit_code, 7);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_times_out() {
        if !program_available("sleep") {
            eprintln!("Skipping: sleep not available");
            return;
        }
        let runner = ProcessRunner::new(Duration::from_millis(50), 3);
        let inv = Invocation::new(argv(&["sleep", "5"]));
        let start = Instant::now();
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ProcessTimeout(d) if d == Duration::from_millis(150)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_background_child_holding_pipes_times_out() {
        if !program_available("sh") {
            eprintln!("Skipping: sh not available");
            return;
        }
        let runner = ProcessRunner::new(Duration::from_millis(50), 4);
        let inv = Invocation::new(argv(&["sh", "-c", "sleep 3 & echo hi"]));
        let start = Instant::now();
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ProcessTimeout(d) if d == Duration::from_millis(200)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
