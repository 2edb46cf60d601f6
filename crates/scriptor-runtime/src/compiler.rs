//! Compiler capability and the external-process compiler backend.
//!
//! # Flow
//!
//! 1. The artifact cache hands a [`SourceUnit`] to a [`Compiler`]
//! 2. [`ProcessCompiler`] writes the source under
//!    `<work_dir>/<engine>/<stem>-<fingerprint>/src/<Stem>.<ext>`
//! 3. The configured compiler argv runs through the [`ProcessRunner`]
//! 4. Its output is parsed into diagnostics and classified by a
//!    [`DiagnosticCollector`]
//! 5. Zero errors yields a [`CompiledArtifact`] whose executable is the
//!    configured launch command

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use scriptor_config::CompilerSection;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Diagnostics};
use crate::error::{Result, RuntimeError};
use crate::executor::ScriptOutput;
use crate::process::{EnvironmentPatch, Invocation, ProcessRunner};
use crate::resource::{Fingerprint, ScriptResource};

/// Source handed to a compiler.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Resource path, used as the diagnostic source name.
    pub path: String,
    pub text: String,
    pub fingerprint: Fingerprint,
}

impl SourceUnit {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let fingerprint = Fingerprint::of(text.as_bytes());
        Self {
            path: path.into(),
            text,
            fingerprint,
        }
    }

    /// File stem of the resource path (`/apps/Service.java` -> `Service`).
    pub fn stem(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        name.split('.').next().unwrap_or(name)
    }
}

impl From<&ScriptResource> for SourceUnit {
    fn from(resource: &ScriptResource) -> Self {
        Self {
            path: resource.path.clone(),
            text: resource.text().into_owned(),
            fingerprint: resource.fingerprint.clone(),
        }
    }
}

/// Something that can be run once a compile succeeded.
#[async_trait]
pub trait Executable: Send + Sync {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<ScriptOutput>;
}

/// Output of a successful compile. Immutable once published.
pub struct CompiledArtifact {
    pub source_path: String,
    /// Fingerprint of the source this artifact was built from.
    pub fingerprint: Fingerprint,
    /// Rendered warnings from the compile (empty when clean).
    pub warnings: String,
    pub executable: Arc<dyn Executable>,
    pub compile_time: Duration,
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("source_path", &self.source_path)
            .field("fingerprint", &self.fingerprint)
            .field("warnings", &self.warnings)
            .field("compile_time", &self.compile_time)
            .finish_non_exhaustive()
    }
}

/// Turns source into an executable artifact.
///
/// Succeeds iff no error diagnostic was reported. Failures to run the
/// compiler itself are reported as a single error diagnostic.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Engine-facing name, used for work directories and logs.
    fn name(&self) -> &str;

    async fn compile(
        &self,
        unit: &SourceUnit,
    ) -> std::result::Result<CompiledArtifact, Diagnostics>;
}

// ─────────────────────────────────────────────────────────────────────────────
// External-process compiler
// ─────────────────────────────────────────────────────────────────────────────

/// Compiler that shells out to a program such as `javac` or `groovyc`.
pub struct ProcessCompiler {
    name: String,
    settings: CompilerSection,
    work_dir: PathBuf,
    compile_runner: ProcessRunner,
    launch_runner: ProcessRunner,
    parser: OutputParser,
    package: Regex,
}

impl ProcessCompiler {
    /// Create a compiler named `name` keeping its work files under `work_dir`.
    ///
    /// `run_timeout` bounds both the compile and every launch.
    pub fn new(
        name: impl Into<String>,
        settings: CompilerSection,
        work_dir: impl Into<PathBuf>,
        run_timeout: Duration,
    ) -> Result<Self> {
        let parser = OutputParser::new()
            .map_err(|e| RuntimeError::execution(format!("Invalid diagnostic pattern: {e}")))?;
        let package = Regex::new(r"(?m)^\s*package\s+([A-Za-z_][\w.]*)\s*;?")
            .map_err(|e| RuntimeError::execution(format!("Invalid package pattern: {e}")))?;
        let runner = ProcessRunner::with_timeout(run_timeout);
        Ok(Self {
            name: name.into(),
            settings,
            work_dir: work_dir.into(),
            compile_runner: runner,
            launch_runner: runner,
            parser,
            package,
        })
    }

    /// Compile/launch settings in use.
    pub fn settings(&self) -> &CompilerSection {
        &self.settings
    }

    /// Fully-qualified entry class: file stem plus any `package` declaration.
    pub fn main_class(&self, unit: &SourceUnit) -> String {
        match self.package.captures(&unit.text) {
            Some(caps) => format!("{}.{}", &caps[1], unit.stem()),
            None => unit.stem().to_string(),
        }
    }

    /// One directory per resource path and content, so units that share a file
    /// name never overwrite each other's output.
    fn unit_dir(&self, unit: &SourceUnit) -> PathBuf {
        let path_hash = Fingerprint::of(unit.path.as_bytes());
        self.work_dir.join(&self.name).join(format!(
            "{}-{}-{}",
            unit.stem(),
            path_hash.short(),
            unit.fingerprint.short()
        ))
    }

    async fn prepare(&self, unit: &SourceUnit) -> std::io::Result<(PathBuf, PathBuf)> {
        let dir = self.unit_dir(unit);
        let src_dir = dir.join("src");
        let out_dir = dir.join("classes");
        // Stale output from an interrupted attempt must not leak into this one.
        if tokio::fs::metadata(&out_dir).await.is_ok() {
            tokio::fs::remove_dir_all(&out_dir).await?;
        }
        tokio::fs::create_dir_all(&src_dir).await?;
        tokio::fs::create_dir_all(&out_dir).await?;

        let source = src_dir.join(format!("{}.{}", unit.stem(), self.settings.extension));
        tokio::fs::write(&source, &unit.text).await?;
        Ok((source, out_dir))
    }
}

#[async_trait]
impl Compiler for ProcessCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn compile(
        &self,
        unit: &SourceUnit,
    ) -> std::result::Result<CompiledArtifact, Diagnostics> {
        let (source, out_dir) = self.prepare(unit).await.map_err(|e| {
            Diagnostics::single_error(format!("Failed to write source for {}: {e}", unit.path))
        })?;
        let main_class = self.main_class(unit);
        let placeholders = Placeholders {
            source: &source,
            out_dir: &out_dir,
            main_class: &main_class,
        };

        let start = Instant::now();
        let argv = placeholders.render(&self.settings.compile);
        let invocation = Invocation::new(argv).in_dir(out_dir.clone());
        let output = self
            .compile_runner
            .run(&invocation)
            .await
            .map_err(|e| Diagnostics::single_error(e.to_string()))?;
        let compile_time = start.elapsed();

        let mut collector = DiagnosticCollector::new();
        let combined = format!("{}{}", output.stdout, output.stderr);
        for diagnostic in self.parser.parse(&combined) {
            collector.report(rename_source(diagnostic, &source, &unit.path));
        }
        if !output.success() && collector.error_count() == 0 {
            collector.report(
                Diagnostic::error(format!(
                    "{} exited with code {}\n{}",
                    self.settings.compile.first().map(String::as_str).unwrap_or("compiler"),
                    output.exit_code,
                    combined.trim_end()
                ))
                .with_source(unit.path.clone()),
            );
        }

        let diagnostics = collector.finish();
        if diagnostics.has_errors() {
            warn!(
                engine = %self.name,
                path = %unit.path,
                errors = diagnostics.error_count,
                "Compilation failed"
            );
            return Err(diagnostics);
        }

        debug!(
            engine = %self.name,
            path = %unit.path,
            fingerprint = %unit.fingerprint.short(),
            warnings = diagnostics.warning_count,
            elapsed = ?compile_time,
            "Compiled"
        );

        let launch = LaunchCommand {
            argv: placeholders.render(&self.settings.launch),
            cwd: out_dir,
            runner: self.launch_runner,
        };
        Ok(CompiledArtifact {
            source_path: unit.path.clone(),
            fingerprint: unit.fingerprint.clone(),
            warnings: diagnostics.warnings,
            executable: Arc::new(launch),
            compile_time,
        })
    }
}

struct Placeholders<'a> {
    source: &'a Path,
    out_dir: &'a Path,
    main_class: &'a str,
}

impl Placeholders<'_> {
    fn render(&self, template: &[String]) -> Vec<String> {
        let source = self.source.to_string_lossy();
        let out_dir = self.out_dir.to_string_lossy();
        template
            .iter()
            .map(|arg| {
                arg.replace("{source}", &source)
                    .replace("{out_dir}", &out_dir)
                    .replace("{main_class}", self.main_class)
            })
            .collect()
    }
}

fn rename_source(mut diagnostic: Diagnostic, written: &Path, display: &str) -> Diagnostic {
    if let Some(ref reported) = diagnostic.source {
        let same_file = Path::new(reported) == written
            || Path::new(reported).file_name() == written.file_name();
        if same_file {
            diagnostic.source = Some(display.to_string());
        }
    }
    diagnostic
}

/// Launch command of a compiled artifact.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    argv: Vec<String>,
    cwd: PathBuf,
    runner: ProcessRunner,
}

impl LaunchCommand {
    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

#[async_trait]
impl Executable for LaunchCommand {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<ScriptOutput> {
        let invocation = Invocation::new(self.argv.clone())
            .with_env(EnvironmentPatch::set_all(ctx.process_env()))
            .in_dir(self.cwd.clone());
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(RuntimeError::execution(format!(
                "{} exited with code {}: {}",
                ctx.path(),
                output.exit_code,
                output.stderr.trim_end()
            )));
        }
        Ok(ScriptOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            elapsed: output.elapsed,
            ..Default::default()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parses compiler output in the formats of javac, gcc/rustc and groovyc.
pub struct OutputParser {
    groovy: Regex,
    located_col: Regex,
    located: Regex,
    caret: Regex,
    bare: Regex,
    arrow: Regex,
    note: Regex,
}

impl OutputParser {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            // /src/Main.groovy: 3: unexpected token: } @ line 3, column 1.
            groovy: Regex::new(
                r"^(?P<file>.+?): \d+: (?P<msg>.+) @ line (?P<line>\d+), column (?P<col>\d+)\.?\s*$",
            )?,
            // main.c:3:5: error: expected ';'
            located_col: Regex::new(
                r"^(?P<file>.+?):(?P<line>\d+):(?P<col>\d+): (?P<kind>fatal error|error|warning|note|mandatory warning): (?P<msg>.*)$",
            )?,
            // Service.java:3: error: ';' expected
            located: Regex::new(
                r"^(?P<file>.+?):(?P<line>\d+): (?P<kind>error|warning|note|mandatory warning): (?P<msg>.*)$",
            )?,
            caret: Regex::new(r"^\s*\^\s*$")?,
            // error[E0308]: mismatched types / warning: [options] bootstrap ...
            bare: Regex::new(r"^(?P<kind>error|warning|note)(?:\[\w+\])?: (?P<msg>.*)$")?,
            //   --> src/main.rs:2:5
            arrow: Regex::new(r"^\s*--> (?P<file>.+?):(?P<line>\d+):(?P<col>\d+)\s*$")?,
            note: Regex::new(r"^Note: (?P<msg>.*)$")?,
        })
    }

    /// Parse every recognised diagnostic, in output order.
    pub fn parse(&self, output: &str) -> Vec<Diagnostic> {
        let lines: Vec<&str> = output.lines().collect();
        let mut found = Vec::new();
        let mut i = 0;

        while i < lines.len() {
            let line = lines[i];

            if let Some(caps) = self.groovy.captures(line) {
                found.push(
                    Diagnostic::error(caps["msg"].trim())
                        .with_source(&caps["file"])
                        .at(number(&caps["line"]), number(&caps["col"])),
                );
                i += 1;
                continue;
            }

            if let Some(caps) = self.located_col.captures(line) {
                found.push(
                    Diagnostic::new(DiagnosticKind::from_word(&caps["kind"]), &caps["msg"])
                        .with_source(&caps["file"])
                        .at(number(&caps["line"]), number(&caps["col"])),
                );
                i += 1;
                continue;
            }

            if let Some(caps) = self.located.captures(line) {
                let mut diagnostic =
                    Diagnostic::new(DiagnosticKind::from_word(&caps["kind"]), &caps["msg"])
                        .with_source(&caps["file"])
                        .at(number(&caps["line"]), 0);
                // javac echoes the offending line, then a caret under the column.
                if let Some(caret_line) = lines.get(i + 2).filter(|l| self.caret.is_match(l)) {
                    if let Some(pos) = caret_line.find('^') {
                        diagnostic.column = pos as u64 + 1;
                    }
                    i += 3;
                } else {
                    i += 1;
                }
                found.push(diagnostic);
                continue;
            }

            if let Some(caps) = self.bare.captures(line) {
                let mut diagnostic =
                    Diagnostic::new(DiagnosticKind::from_word(&caps["kind"]), &caps["msg"]);
                i += 1;
                if let Some(arrow) = lines.get(i).and_then(|l| self.arrow.captures(l)) {
                    diagnostic = diagnostic
                        .with_source(&arrow["file"])
                        .at(number(&arrow["line"]), number(&arrow["col"]));
                    i += 1;
                }
                found.push(diagnostic);
                continue;
            }

            if let Some(caps) = self.note.captures(line) {
                found.push(Diagnostic::new(DiagnosticKind::Note, &caps["msg"]));
            }
            i += 1;
        }

        found
    }
}

fn number(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}
