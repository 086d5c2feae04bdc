use std::{
    fmt,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use tokio::{
    fs::File,
    io::{self, AsyncWriteExt as _},
    process::Command,
};

use crate::deploy::DeployDescriptor;

pub const STDOUT_FILE: &str = ".deployer.stdout";
pub const STDERR_FILE: &str = ".deployer.stderr";

const TAG: &str = "[branch-deployer]";
const SEPARATOR: &str = "--------------------------------------------------";

#[derive(Debug)]
pub enum CommandStatus {
    NotStarted(String),
    Exited(ExitStatus),
    WaitFailed(String),
}

impl CommandStatus {
    pub fn success(&self) -> bool {
        matches!(self, CommandStatus::Exited(status) if status.success())
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::NotStarted(err) => write!(f, "not started: {}", err),
            CommandStatus::Exited(status) => write!(f, "{}", status),
            CommandStatus::WaitFailed(err) => write!(f, "wait failed: {}", err),
        }
    }
}

#[derive(Debug)]
pub struct CommandOutcome {
    pub command: String,
    pub status: CommandStatus,
    pub stdout_attached: bool,
    pub stderr_attached: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<CommandOutcome>,
}

impl RunReport {
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.status.success())
            .count()
    }
}

/// Per-run output files. Runner messages go to both, failures only to stderr.
struct RunLog {
    stdout: File,
    stderr: File,
}

impl RunLog {
    async fn create(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            stdout: File::create(dir.join(STDOUT_FILE)).await?,
            stderr: File::create(dir.join(STDERR_FILE)).await?,
        })
    }

    async fn info(&mut self, line: &str) {
        write_line(&mut self.stdout, line).await;
        write_line(&mut self.stderr, line).await;
    }

    async fn error(&mut self, line: &str) {
        write_line(&mut self.stderr, line).await;
    }

    async fn flush(&mut self) {
        for file in [&mut self.stdout, &mut self.stderr] {
            if let Err(err) = file.flush().await {
                tracing::warn!("Failed to flush run log: {}", err);
            }
        }
    }
}

/// Hands a duplicate of the log file to the child as its output stream. The
/// child writes straight into the file, so a backgrounded grandchild holding
/// the descriptor open never blocks the run.
async fn attach(file: &mut File) -> io::Result<Stdio> {
    file.flush().await?;
    let dup = file.try_clone().await?;
    Ok(Stdio::from(dup.into_std().await))
}

async fn write_line(file: &mut File, line: &str) {
    let res = async {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await
    }
    .await;
    if let Err(err) = res {
        tracing::warn!("Failed to write run log: {}", err);
    }
}

/// Executes the commands of a descriptor one after another inside a working
/// copy. A failing command never stops the ones after it.
#[derive(Debug, Clone)]
pub struct Runner {
    dir: PathBuf,
    descriptor: DeployDescriptor,
}

impl Runner {
    pub fn new(dir: PathBuf, descriptor: DeployDescriptor) -> Self {
        Self { dir, descriptor }
    }

    pub async fn run(self) -> RunReport {
        let mut log = match RunLog::create(&self.dir).await {
            Ok(log) => log,
            Err(err) => {
                tracing::error!("Failed to create run logs in {:?}: {}", self.dir, err);
                return RunReport::default();
            }
        };

        let mut report = RunReport::default();
        for command in &self.descriptor.commands {
            let outcome = self.run_command(&mut log, command).await;
            tracing::info!(
                command = command.as_str(),
                status = %outcome.status,
                "Command finished"
            );
            report.outcomes.push(outcome);
        }
        log.flush().await;

        tracing::info!(
            commands = report.outcomes.len(),
            failed = report.failures(),
            "Deployment run finished"
        );
        report
    }

    async fn run_command(&self, log: &mut RunLog, raw: &str) -> CommandOutcome {
        log.info(SEPARATOR).await;
        log.info(&format!("{} Preparing command {}", TAG, raw)).await;

        let not_started = |reason: String| CommandOutcome {
            command: raw.to_owned(),
            status: CommandStatus::NotStarted(reason),
            stdout_attached: false,
            stderr_attached: false,
        };

        let invocation = match self.descriptor.invocation(raw) {
            Some(invocation) => invocation,
            None => {
                log.error(&format!("{} Failed to execute command: empty command!", TAG))
                    .await;
                return not_started("empty command".to_owned());
            }
        };

        let (stdout, stderr) = (attach(&mut log.stdout).await, attach(&mut log.stderr).await);
        let stdout_attached = stdout.is_ok();
        let stderr_attached = stderr.is_ok();
        let stdout = stdout.unwrap_or_else(|err| {
            tracing::warn!("Failed to attach stdout log: {}", err);
            Stdio::null()
        });
        let stderr = stderr.unwrap_or_else(|err| {
            tracing::warn!("Failed to attach stderr log: {}", err);
            Stdio::null()
        });

        let spawned = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&self.dir)
            .envs(self.descriptor.env_overrides())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(command = raw, "Failed to execute command: {}", err);
                log.error(&format!("{} Failed to execute command: {}!", TAG, err))
                    .await;
                return not_started(err.to_string());
            }
        };
        log.info(&format!("{} Command started. Piping output...", TAG))
            .await;
        if !stdout_attached {
            log.error(&format!("{} Failed to open stdout of command!", TAG))
                .await;
        }
        if !stderr_attached {
            log.error(&format!("{} Failed to open stderr of command!", TAG))
                .await;
        }

        let status = match child.wait().await {
            Ok(status) => {
                if !status.success() {
                    log.error(&format!("{} Command failed: {}!", TAG, status))
                        .await;
                }
                CommandStatus::Exited(status)
            }
            Err(err) => {
                log.error(&format!("{} Error while waiting for command: {}!", TAG, err))
                    .await;
                CommandStatus::WaitFailed(err.to_string())
            }
        };
        log.info(&format!("{} Command execution finished.", TAG))
            .await;

        CommandOutcome {
            command: raw.to_owned(),
            status,
            stdout_attached,
            stderr_attached,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn descriptor(commands: &[&str]) -> DeployDescriptor {
        DeployDescriptor {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    fn read(dir: &Path, file: &str) -> String {
        fs::read_to_string(dir.join(file)).unwrap()
    }

    #[tokio::test]
    async fn attempts_every_command() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(
            dir.path().to_owned(),
            descriptor(&["echo one", "/definitely/not/a/program --flag", "echo three"]),
        )
        .run()
        .await;

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes[0].status.success());
        assert!(matches!(report.outcomes[1].status, CommandStatus::NotStarted(_)));
        assert!(report.outcomes[2].status.success());
        assert_eq!(report.failures(), 1);

        let stdout = read(dir.path(), STDOUT_FILE);
        assert_eq!(stdout.matches("Preparing command").count(), 3);
        assert!(stdout.contains("one\n"));
        assert!(stdout.contains("three\n"));

        let stderr = read(dir.path(), STDERR_FILE);
        assert_eq!(stderr.matches("Preparing command").count(), 3);
        assert_eq!(stderr.matches("Failed to execute command").count(), 1);
    }

    #[tokio::test]
    async fn non_zero_exit_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(dir.path().to_owned(), descriptor(&["false", "echo after"]))
            .run()
            .await;

        assert!(matches!(report.outcomes[0].status, CommandStatus::Exited(s) if !s.success()));
        assert!(report.outcomes[1].status.success());
        assert!(read(dir.path(), STDOUT_FILE).contains("after\n"));
        assert!(read(dir.path(), STDERR_FILE).contains("Command failed"));
    }

    #[tokio::test]
    async fn shell_receives_command_verbatim_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DeployDescriptor {
            shell: Some("sh".into()),
            shell_args: vec!["-c".into()],
            env: vec!["GREETING=hello there".into(), "PATH_SUFFIX=x".into()],
            commands: vec![
                "echo \"$GREETING\" && pwd".into(),
                "printf 'o%sps\\n' o >&2; exit 3".into(),
            ],
        };
        let report = Runner::new(dir.path().to_owned(), descriptor).run().await;

        assert!(report.outcomes[0].status.success());
        assert!(report.outcomes[0].stdout_attached && report.outcomes[0].stderr_attached);
        let stdout = read(dir.path(), STDOUT_FILE);
        assert!(stdout.contains("hello there\n"));
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(stdout.contains(&dir_name));

        let stderr = read(dir.path(), STDERR_FILE);
        assert!(stderr.contains("oops\n"));
        assert!(!stdout.contains("oops"));
        assert!(matches!(report.outcomes[1].status, CommandStatus::Exited(s) if s.code() == Some(3)));
    }

    #[tokio::test]
    async fn backgrounded_child_does_not_hold_up_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DeployDescriptor {
            shell: Some("sh".into()),
            shell_args: vec!["-c".into()],
            commands: vec!["sleep 30 &".into(), "echo after".into()],
            ..Default::default()
        };
        let report = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            Runner::new(dir.path().to_owned(), descriptor).run(),
        )
        .await
        .expect("run should not wait for the background process");

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failures(), 0);
        assert!(read(dir.path(), STDOUT_FILE).contains("after\n"));
    }

    #[tokio::test]
    async fn output_lands_between_marker_lines() {
        let dir = tempfile::tempdir().unwrap();
        Runner::new(dir.path().to_owned(), descriptor(&["echo alpha", "echo bravo"]))
            .run()
            .await;

        let stdout = read(dir.path(), STDOUT_FILE);
        let alpha = stdout.find("\nalpha\n").unwrap();
        let bravo_marker = stdout.find("Preparing command echo bravo").unwrap();
        let bravo = stdout.find("\nbravo\n").unwrap();
        assert!(alpha < bravo_marker);
        assert!(bravo_marker < bravo);
    }

    #[tokio::test]
    async fn overrides_win_over_inherited_env() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = DeployDescriptor {
            shell: Some("sh".into()),
            shell_args: vec!["-c".into()],
            env: vec!["HOME=/overridden".into()],
            commands: vec!["echo \"home=$HOME\"".into()],
        };
        Runner::new(dir.path().to_owned(), descriptor).run().await;
        assert!(read(dir.path(), STDOUT_FILE).contains("home=/overridden\n"));
    }

    #[tokio::test]
    async fn logs_are_truncated_per_run() {
        let dir = tempfile::tempdir().unwrap();
        Runner::new(dir.path().to_owned(), descriptor(&["echo first-run"]))
            .run()
            .await;
        Runner::new(dir.path().to_owned(), descriptor(&["echo second-run"]))
            .run()
            .await;

        let stdout = read(dir.path(), STDOUT_FILE);
        assert!(!stdout.contains("first-run"));
        assert!(stdout.contains("second-run"));
        assert_eq!(stdout.matches("Preparing command").count(), 1);
    }

    #[tokio::test]
    async fn blank_command_is_recorded_as_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(dir.path().to_owned(), descriptor(&["   ", "echo ok"]))
            .run()
            .await;
        assert!(matches!(report.outcomes[0].status, CommandStatus::NotStarted(_)));
        assert!(report.outcomes[1].status.success());
    }

    #[tokio::test]
    async fn missing_directory_skips_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(dir.path().join("gone"), descriptor(&["echo hi"]))
            .run()
            .await;
        assert!(report.outcomes.is_empty());
    }
}
