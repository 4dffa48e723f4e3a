//! Direct-invocation transport
//!
//! Launches the caller (`<tool> <method> -R ... -I ... -O ...`) as a child
//! process with stdout and stderr captured to a per-job log file. The tool
//! runs under a `/bin/sh` wrapper that records its exit code in
//! `<output_dir>/<id>/exit_code` once it finishes, so any process can later
//! decide the outcome. Running children live in a table owned by the runner;
//! polling reaps them with `try_wait` and cancellation kills their process
//! group.

use super::{PipelineRunner, PollOutcome, Submission, SubmitRequest};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::job::{CallingJob, JobId};
use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};

/// Lines of the process log quoted in failure messages
const LOG_TAIL_LINES: usize = 20;

const OUTPUT_FILE: &str = "somatic_variants.vcf.gz";
const EXIT_CODE_FILE: &str = "exit_code";

/// Runs `$0 "$@"` and renames the exit code into `$MUTAFLOW_EXIT_CODE`
const WRAPPER: &str = r#""$0" "$@"
code=$?
printf '%s\n' "$code" > "$MUTAFLOW_EXIT_CODE.tmp" && mv -f "$MUTAFLOW_EXIT_CODE.tmp" "$MUTAFLOW_EXIT_CODE"
exit $code"#;

struct RunningJob {
    child: Child,
}

pub struct DirectRunner {
    tool: String,
    reference_path: String,
    panel_of_normals: Option<String>,
    output_dir: PathBuf,
    log_dir: Option<PathBuf>,
    children: Mutex<HashMap<JobId, RunningJob>>,
}

impl DirectRunner {
    pub fn new(tool: &str, reference_path: &str, output_dir: &Path) -> Self {
        DirectRunner {
            tool: tool.to_string(),
            reference_path: reference_path.to_string(),
            panel_of_normals: None,
            output_dir: output_dir.to_path_buf(),
            log_dir: None,
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut runner = DirectRunner::new(&config.tool, &config.reference_path, &config.output_dir);
        runner.panel_of_normals = config.panel_of_normals.clone();
        runner.log_dir = config.log_dir.clone();
        runner
    }

    pub fn with_panel_of_normals(mut self, pon: &str) -> Self {
        self.panel_of_normals = Some(pon.to_string());
        self
    }

    pub fn output_path(&self, id: &JobId) -> PathBuf {
        self.output_dir.join(id.as_str()).join(OUTPUT_FILE)
    }

    pub fn log_path(&self, id: &JobId) -> PathBuf {
        match &self.log_dir {
            Some(dir) => dir.join(format!("{}.log", id)),
            None => self.output_dir.join(id.as_str()).join("pipeline.log"),
        }
    }

    /// Written by the launch wrapper when the tool exits
    pub fn exit_code_path(&self, id: &JobId) -> PathBuf {
        self.output_dir.join(id.as_str()).join(EXIT_CODE_FILE)
    }

    /// Arguments passed to the tool, method first
    pub fn command_args(&self, job: &CallingJob, request: &SubmitRequest) -> Vec<String> {
        let mut args = vec![
            job.calling_method.clone(),
            "-R".to_string(),
            self.reference_path.clone(),
            "-I".to_string(),
            request.tumor.bam.clone(),
            "-tumor".to_string(),
            request.tumor.id.clone(),
        ];
        if let Some(normal) = &request.normal {
            args.extend([
                "-I".to_string(),
                normal.bam.clone(),
                "-normal".to_string(),
                normal.id.clone(),
            ]);
        }
        if let Some(pon) = &self.panel_of_normals {
            args.extend(["--panel-of-normals".to_string(), pon.clone()]);
        }
        args.extend([
            "-O".to_string(),
            self.output_path(&job.id).display().to_string(),
        ]);
        args
    }

    fn children(&self) -> Result<MutexGuard<'_, HashMap<JobId, RunningJob>>> {
        self.children
            .lock()
            .map_err(|_| PipelineError::Store("process table lock poisoned".to_string()))
    }

    /// Exit code recorded by the wrapper, `None` while the tool runs
    fn recorded_exit_code(&self, id: &JobId) -> Result<Option<i32>> {
        let path = self.exit_code_path(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::protocol_io(&path, e)),
        };
        text.trim().parse::<i32>().map(Some).map_err(|_| {
            PipelineError::ExternalProcess(format!(
                "unreadable exit code '{}' in {}",
                text.trim(),
                path.display()
            ))
        })
    }

    /// Terminal outcome of a finished tool run
    fn exit_outcome(&self, id: &JobId, code: Option<i32>) -> PollOutcome {
        let output = self.output_path(id);
        if code == Some(0) {
            if output.exists() {
                return PollOutcome::Completed(output.display().to_string());
            }
            return PollOutcome::Failed(format!(
                "{} exited successfully but produced no output at {}",
                self.tool,
                output.display()
            ));
        }

        let cause = match code {
            Some(code) => format!("{} exited with code {}", self.tool, code),
            None => format!("{} was terminated by a signal", self.tool),
        };
        let tail = log_tail(&self.log_path(id), LOG_TAIL_LINES);
        log::error!("Job {} failed: {}", id, cause);
        if tail.is_empty() {
            PollOutcome::Failed(cause)
        } else {
            PollOutcome::Failed(format!("{}\n{}", cause, tail))
        }
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::protocol_io(dir, e))?;
    }
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(PipelineError::protocol_io(path, e)),
        _ => Ok(()),
    }
}

/// Resolves the tool the way the shell would: a path as given, a bare name on `PATH`
fn find_executable(tool: &str) -> Option<PathBuf> {
    let path = Path::new(tool);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let dirs = std::env::var_os("PATH")?;
    std::env::split_paths(&dirs)
        .map(|dir| dir.join(tool))
        .find(|candidate| candidate.is_file())
}

/// Kills the wrapper and the tool it started, then reaps the wrapper
fn kill_process_group(child: &mut Child) -> std::io::Result<()> {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-s", "KILL", "--", group.as_str()])
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !killed {
        // kill fails only if the child already exited, which is fine to reap
        if let Err(e) = child.kill() {
            log::debug!("kill of pid {}: {}", child.id(), e);
        }
    }
    child.wait().map(|_| ())
}

/// Last lines of the process log, empty when unreadable
fn log_tail(path: &Path, lines: usize) -> String {
    match std::fs::read(path) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let all: Vec<&str> = text.lines().collect();
            all[all.len().saturating_sub(lines)..].join("\n")
        }
        Err(_) => String::new(),
    }
}

impl PipelineRunner for DirectRunner {
    fn name(&self) -> &str {
        "direct"
    }

    fn submit(&self, job: &CallingJob, request: &SubmitRequest) -> Result<Submission> {
        let output = self.output_path(&job.id);
        let log_path = self.log_path(&job.id);
        let exit_code = self.exit_code_path(&job.id);
        create_parent(&output)?;
        create_parent(&log_path)?;
        remove_stale(&exit_code)?;

        let Some(executable) = find_executable(&self.tool) else {
            return Err(PipelineError::ExternalProcess(format!(
                "failed to launch {}: not found",
                self.tool
            )));
        };

        let log = File::create(&log_path).map_err(|e| PipelineError::protocol_io(&log_path, e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| PipelineError::protocol_io(&log_path, e))?;

        let args = self.command_args(job, request);
        let command_line = format!("{} {}", self.tool, args.join(" "));
        log::info!("Launching job {}: {}", job.id, command_line);

        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(WRAPPER)
            .arg(&executable)
            .args(&args)
            .env("MUTAFLOW_EXIT_CODE", &exit_code)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().map_err(|e| {
            PipelineError::ExternalProcess(format!("failed to launch {}: {}", self.tool, e))
        })?;
        let pid = child.id();

        self.children()?.insert(job.id.clone(), RunningJob { child });

        Ok(Submission {
            progress: format!("{} started (pid {})", job.calling_method, pid),
            command_line: Some(command_line),
            log_path: Some(log_path.display().to_string()),
        })
    }

    fn poll(&self, job: &CallingJob) -> Result<PollOutcome> {
        let mut children = self.children()?;
        let Some(running) = children.get_mut(&job.id) else {
            // Launched by another process, or already reaped
            return match self.recorded_exit_code(&job.id)? {
                Some(code) => Ok(self.exit_outcome(&job.id, Some(code))),
                None if self.log_path(&job.id).exists() => Ok(PollOutcome::InProgress(None)),
                None => {
                    log::debug!("No process handle or exit code for job {}", job.id);
                    Ok(PollOutcome::Pending)
                }
            };
        };

        let status = running.child.try_wait().map_err(|e| {
            PipelineError::ExternalProcess(format!("cannot query process for job {}: {}", job.id, e))
        })?;
        let Some(status) = status else {
            return Ok(PollOutcome::InProgress(Some(format!(
                "{} running (pid {})",
                job.calling_method,
                running.child.id()
            ))));
        };

        children.remove(&job.id);
        // the wrapper exits with the tool's code after recording it
        let code = self.recorded_exit_code(&job.id)?.or(status.code());
        Ok(self.exit_outcome(&job.id, code))
    }

    fn cancel(&self, job: &CallingJob) -> Result<bool> {
        let Some(mut running) = self.children()?.remove(&job.id) else {
            return Ok(true);
        };
        kill_process_group(&mut running.child).map_err(|e| {
            PipelineError::ExternalProcess(format!("cannot reap process for job {}: {}", job.id, e))
        })?;
        log::info!("Terminated process for job {}", job.id);
        Ok(true)
    }
}
