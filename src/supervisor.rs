//! Node watch mode process supervision
//!
//! A `Supervisor` decides when the server bundle's child process is started
//! and stopped. `run` owns it together with the child and feeds it events
//! from the executor and from the child, so at most one child ever runs.

use std::path::Path;
use std::process::Stdio;

use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::BuildReport;
use crate::utils::path_string;

/// Hot reload messages that can only be resolved by a fresh process
static RESTART_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[HMR\] (Cannot apply update|You need to restart the application!)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Idle,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    BuildCompleted { hash: String, has_errors: bool },
    Spawned,
    SpawnFailed,
    ChildExited,
    RestartRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorCommand {
    Start { hash: String },
    Stop,
}

/// Child lifecycle state machine
#[derive(Debug, Clone)]
pub struct Supervisor {
    state: ChildState,
    last_build: Option<String>,
    latest_good: Option<String>,
    pending_start: bool,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            state: ChildState::Idle,
            last_build: None,
            latest_good: None,
            pending_start: false,
        }
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    /// Advance on one event. `Start` is only ever returned from `Idle`.
    pub fn handle(&mut self, event: SupervisorEvent) -> Option<SupervisorCommand> {
        use ChildState::*;

        match event {
            SupervisorEvent::BuildCompleted { hash, has_errors } => {
                let fresh = self.last_build.as_deref() != Some(hash.as_str());
                self.last_build = Some(hash.clone());

                if has_errors {
                    self.pending_start = false;
                    return match self.state {
                        Starting | Running => {
                            self.state = Stopping;
                            Some(SupervisorCommand::Stop)
                        }
                        Idle | Stopping => None,
                    };
                }

                self.latest_good = Some(hash.clone());
                match self.state {
                    Idle if fresh => {
                        self.state = Starting;
                        Some(SupervisorCommand::Start { hash })
                    }
                    Stopping if fresh => {
                        self.pending_start = true;
                        None
                    }
                    // a running child picks up rebuilds by polling
                    _ => None,
                }
            }
            SupervisorEvent::Spawned => {
                if self.state == Starting {
                    self.state = Running;
                }
                None
            }
            SupervisorEvent::SpawnFailed => {
                self.state = Idle;
                None
            }
            SupervisorEvent::ChildExited => {
                let was = self.state;
                self.state = Idle;

                if was != Stopping || !self.pending_start {
                    return None;
                }

                self.pending_start = false;
                let hash = self.latest_good.clone()?;
                self.state = Starting;
                Some(SupervisorCommand::Start { hash })
            }
            SupervisorEvent::RestartRequested => match self.state {
                Running => {
                    self.pending_start = self.latest_good.is_some();
                    self.state = Stopping;
                    Some(SupervisorCommand::Stop)
                }
                _ => None,
            },
        }
    }
}

/// A running child: kill switch plus the task awaiting its exit
struct ChildHandle {
    kill: oneshot::Sender<()>,
    exited: JoinHandle<()>,
}

type Tagged = (u64, SupervisorEvent);

/// Interpreter the server bundle runs under
pub const NODE: &str = "node";

/// Restart `<command...> <bundle>` on every good rebuild until the build
/// stream ends
pub async fn run(mut builds: mpsc::Receiver<BuildReport>, command: &[String], bundle: &Path) {
    let (events_tx, mut events_rx) = mpsc::channel::<Tagged>(16);
    let mut supervisor = Supervisor::new();
    let mut generation = 0u64;
    let mut child: Option<ChildHandle> = None;

    loop {
        let event = tokio::select! {
            build = builds.recv() => match build {
                Some(report) => {
                    report_build(&report);
                    SupervisorEvent::BuildCompleted {
                        hash: report.hash.clone(),
                        has_errors: report.has_errors(),
                    }
                }
                None => break,
            },
            Some((tag, event)) = events_rx.recv() => {
                if tag != generation {
                    debug!("Dropping {:?} from stale child {}", event, tag);
                    continue;
                }
                event
            }
        };

        let mut next = supervisor.handle(event);
        while let Some(step) = next.take() {
            next = match step {
                SupervisorCommand::Start { hash } => {
                    generation += 1;
                    debug!("Starting child {} for build {}", generation, hash);
                    match spawn_child(command, bundle, generation, events_tx.clone()) {
                        Ok(handle) => {
                            child = Some(handle);
                            supervisor.handle(SupervisorEvent::Spawned)
                        }
                        Err(e) => {
                            error!("Failed to start {}: {}", bundle.display(), e);
                            supervisor.handle(SupervisorEvent::SpawnFailed)
                        }
                    }
                }
                SupervisorCommand::Stop => {
                    if let Some(handle) = child.take() {
                        let _ = handle.kill.send(());
                    }
                    None
                }
            };
        }
    }

    drop(events_rx);
    if let Some(handle) = child.take() {
        let _ = handle.kill.send(());
        let _ = handle.exited.await;
    }
}

fn report_build(report: &BuildReport) {
    if report.has_errors() {
        eprintln!("{}", "\n------ build failed ------".red().bold());
        eprintln!("{}", report.errors.join("\n\n\n------\n\n").red());
    } else {
        info!("Rebuilt {}", report.hash);
    }
}

fn spawn_child(
    command: &[String],
    bundle: &Path,
    generation: u64,
    events: mpsc::Sender<Tagged>,
) -> std::io::Result<ChildHandle> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))?;

    let mut child = Command::new(program)
        .args(args)
        .arg(path_string(bundle))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // must precede anything relayed from this child
    println!("{}", "started".green());

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(relay(stdout, false, generation, events.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(relay(stderr, true, generation, events.clone()));
    }

    let (kill, killed) = oneshot::channel::<()>();
    let exited = tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = killed => None,
        };

        match status {
            Some(Ok(status)) => warn!("Process exited with {}", status),
            Some(Err(e)) => error!("Lost track of process: {}", e),
            None => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop process: {}", e);
                }
                debug!("Stopped child {}", generation);
            }
        }

        let _ = events.send((generation, SupervisorEvent::ChildExited)).await;
    });

    Ok(ChildHandle { kill, exited })
}

async fn relay<R>(stream: R, is_stderr: bool, generation: u64, events: mpsc::Sender<Tagged>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }

        if RESTART_PATTERN.is_match(&line) {
            info!("Hot update rejected, restarting");
            let _ = events
                .send((generation, SupervisorEvent::RestartRequested))
                .await;
        }
    }
}
