//! Deployment orchestration: sync phase, then optional post-deploy phase.
//!
//! The orchestrator owns the operator-facing output. Child output arrives
//! as [`OutputLine`] events from the runner and is written through as it
//! comes, with stderr lines prefixed by `ERR > `.

use console::Style;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::command::{build_post_deploy_command, build_sync_command, CommandSpec};
use crate::config::DeployRequest;
use crate::environment::DeployConfig;
use crate::error::DeployError;
use crate::excludes::resolve_exclude_files;
use crate::runner::{CommandRunner, ExecutionResult, ExitStatus, OutputLine};

/// Where to get a starting rsync_exclude.txt
pub const EXCLUDE_TEMPLATE_URL: &str = "http://bit.ly/rsehdbsf2";

const RULE: &str = "--------------------------------------------";

/// The two subprocess phases of a deploy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sync,
    PostDeploy,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Sync => write!(f, "sync"),
            Phase::PostDeploy => write!(f, "post deploy"),
        }
    }
}

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    SyncRunning,
    DryRunReported,
    PostDeployRunning,
    Done,
}

/// What happened during a deploy that completed without a phase failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub environment: String,
    pub dry_run: bool,
    pub excludes: Vec<PathBuf>,
    pub sync: ExecutionResult,
    /// `None` when the post-deploy phase did not run
    pub post_deploy: Option<ExecutionResult>,
    /// Every state entered, in order, starting from `Idle`
    pub states: Vec<DeployState>,
}

/// Runs one deploy request against a loaded configuration
pub struct Deployer<R, W> {
    config_root: PathBuf,
    runner: R,
    out: W,
    states: Vec<DeployState>,
    notice: Style,
    info: Style,
}

impl<R: CommandRunner, W: Write> Deployer<R, W> {
    pub fn new(config_root: &Path, runner: R, out: W) -> Self {
        Self {
            config_root: config_root.to_path_buf(),
            runner,
            out,
            states: vec![DeployState::Idle],
            notice: Style::new().red().on_yellow(),
            info: Style::new().green(),
        }
    }

    /// Give back the runner and output sink
    pub fn into_parts(self) -> (R, W) {
        (self.runner, self.out)
    }

    /// Deploy `request` to its environment.
    ///
    /// Configuration errors are returned before any process starts. A sync
    /// that fails or times out skips the post-deploy phase; the failure is
    /// returned after the closing output has been written.
    pub fn deploy(
        &mut self,
        config: &DeployConfig,
        request: &DeployRequest,
    ) -> Result<DeployReport, DeployError> {
        self.states = vec![DeployState::Idle];

        let env = config.environment(&request.environment)?;
        let name = env.name.as_str();
        let dry_run = !request.execute_for_real;

        let excludes = resolve_exclude_files(&self.config_root, name);
        if excludes.is_empty() {
            writeln!(
                self.out,
                "{} If you want an rsync_exclude.txt template get it here {}",
                self.notice
                    .apply_to("No rsync_exclude file found, nothing excluded."),
                EXCLUDE_TEMPLATE_URL
            )?;
            writeln!(self.out)?;
        }

        let sync_command = build_sync_command(&env, request, &excludes);
        writeln!(
            self.out,
            "{} on {} server with {} command",
            if dry_run { "Fake deploying" } else { "Deploying" },
            self.info.apply_to(name),
            self.info.apply_to(&sync_command)
        )?;

        self.transition(DeployState::SyncRunning);
        writeln!(self.out, "\nSTART deploy\n{RULE}")?;
        let sync = self.run_streamed(&sync_command)?;
        writeln!(self.out, "\nEND deploy\n{RULE}\n")?;

        let mut report = DeployReport {
            environment: name.to_string(),
            dry_run,
            excludes,
            sync,
            post_deploy: None,
            states: Vec::new(),
        };

        if dry_run {
            self.transition(DeployState::DryRunReported);
            writeln!(
                self.out,
                "{}",
                self.notice.apply_to(
                    "This was a simulation, --go was not specified. Post deploy operation not run."
                )
            )?;
            writeln!(
                self.out,
                "{}",
                self.info.apply_to(format!(
                    "Run the command with --go for really copy the files to {name} server."
                ))
            )?;
            return self.finish(report, phase_outcome(Phase::Sync, &sync));
        }

        if let Err(e) = phase_outcome(Phase::Sync, &sync) {
            writeln!(
                self.out,
                "{}",
                self.notice
                    .apply_to(format!("Deploy on {name} server failed: {e}. Post deploy operation not run."))
            )?;
            return self.finish(report, Err(e));
        }

        writeln!(self.out, "Deployed on {} server!\n", self.info.apply_to(name))?;

        let Some(post_command) = build_post_deploy_command(&env, request) else {
            return self.finish(report, Ok(()));
        };

        self.transition(DeployState::PostDeployRunning);
        writeln!(
            self.out,
            "Running post deploy commands on {} server!\n",
            self.info.apply_to(name)
        )?;
        let post_deploy = self.run_streamed(&post_command)?;
        writeln!(self.out, "\nDone")?;

        report.post_deploy = Some(post_deploy);
        self.finish(report, phase_outcome(Phase::PostDeploy, &post_deploy))
    }

    fn transition(&mut self, next: DeployState) {
        debug!(from = ?self.states.last(), to = ?next, "deploy state");
        self.states.push(next);
    }

    /// Enter `Done`: closing blank line, then the phase outcome
    fn finish(
        &mut self,
        mut report: DeployReport,
        outcome: Result<(), DeployError>,
    ) -> Result<DeployReport, DeployError> {
        self.transition(DeployState::Done);
        writeln!(self.out)?;
        self.out.flush()?;

        report.states = std::mem::take(&mut self.states);
        outcome.map(|()| report)
    }

    fn run_streamed(&mut self, command: &CommandSpec) -> Result<ExecutionResult, DeployError> {
        let out = &mut self.out;
        let mut write_error: Option<io::Error> = None;

        let result = self.runner.run(command, &mut |line| {
            if write_error.is_some() {
                return;
            }
            let written = match &line {
                OutputLine::Stdout(text) => writeln!(out, "{text}"),
                OutputLine::Stderr(text) => writeln!(out, "ERR > {text}"),
            };
            if let Err(e) = written {
                write_error = Some(e);
            }
        })?;

        match write_error {
            Some(e) => Err(e.into()),
            None => Ok(result),
        }
    }
}

/// Map a phase result onto the error taxonomy
fn phase_outcome(phase: Phase, result: &ExecutionResult) -> Result<(), DeployError> {
    match result.status {
        ExitStatus::Exited(0) => Ok(()),
        ExitStatus::Exited(code) => Err(DeployError::PhaseFailed {
            phase,
            code: Some(code),
        }),
        ExitStatus::Signaled => Err(DeployError::PhaseFailed { phase, code: None }),
        ExitStatus::TimedOut(after) => Err(DeployError::Timeout { phase, after }),
    }
}
