//! External command execution.
//!
//! Module kinds shell out to docker/helm/kubectl through the
//! [`CommandRunner`] trait so the engine can be driven with a fake runner
//! in tests. [`ShellRunner`] is the real implementation over
//! `std::process::Command`.

use crate::engine::{EngineError, Result};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

/// A command to execute: program, arguments, optional working directory and
/// extra environment.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program followed by arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.args.len() + 1);
        out.push(self.program.clone());
        out.extend(self.args.iter().cloned());
        out
    }

    pub fn get_cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Space-joined rendering for error messages and logs.
    pub fn render(&self) -> String {
        self.to_args().join(" ")
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Spawns external processes for the engine.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, streaming output live while also capturing it.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run to completion, capturing output silently.
    fn run_hidden(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Spawn a long-lived process with piped stdio and hand back the child.
    fn run_piped(&self, spec: &CommandSpec) -> Result<Child>;
}

/// Real command runner over `std::process::Command`.
pub struct ShellRunner;

impl ShellRunner {
    fn spawn_err(spec: &CommandSpec, source: std::io::Error) -> EngineError {
        EngineError::CommandSpawn {
            argv: spec.render(),
            source,
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        log::debug!("running: {}", spec.render());
        let mut child = spec
            .build()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_err(spec, e))?;

        // Tee both streams: echo lines as they arrive, keep a captured copy.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_thread = std::thread::spawn(move || {
            let mut captured = String::new();
            if let Some(stdout) = stdout {
                for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                    println!("{line}");
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
            captured
        });
        let err_thread = std::thread::spawn(move || {
            let mut captured = String::new();
            if let Some(stderr) = stderr {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    eprintln!("{line}");
                    captured.push_str(&line);
                    captured.push('\n');
                }
            }
            captured
        });

        let status = child.wait().map_err(|e| Self::spawn_err(spec, e))?;
        let stdout = out_thread.join().unwrap_or_default();
        let stderr = err_thread.join().unwrap_or_default();

        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    fn run_hidden(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        log::debug!("running (hidden): {}", spec.render());
        let output = spec
            .build()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Self::spawn_err(spec, e))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn run_piped(&self, spec: &CommandSpec) -> Result<Child> {
        log::debug!("spawning (piped): {}", spec.render());
        spec.build()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_err(spec, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_renders_program_and_args() {
        let spec = CommandSpec::new("docker")
            .arg("build")
            .args(["-t", "acme/web:1.0"])
            .cwd("/tmp")
            .env("DOCKER_BUILDKIT", "1");
        assert_eq!(spec.to_args(), vec!["docker", "build", "-t", "acme/web:1.0"]);
        assert_eq!(spec.render(), "docker build -t acme/web:1.0");
        assert_eq!(spec.get_cwd(), Some(&PathBuf::from("/tmp")));
        assert_eq!(spec.get_env().len(), 1);
    }

    #[test]
    fn hidden_run_captures_output() {
        let output = ShellRunner
            .run_hidden(&CommandSpec::new("echo").arg("hello"))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn hidden_run_reports_nonzero_status() {
        let output = ShellRunner
            .run_hidden(&CommandSpec::new("sh").args(["-c", "exit 3"]))
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.status, 3);
    }

    #[test]
    fn spawn_failure_names_the_command() {
        let err = ShellRunner
            .run_hidden(&CommandSpec::new("definitely-not-a-real-binary-xyz"))
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("definitely-not-a-real-binary-xyz"));
    }
}
