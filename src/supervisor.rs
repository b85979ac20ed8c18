//! The provider supervisor: discovery, launch, health polling and recovery.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    charts::ChartCache,
    config::{ResolvedConfig, Timing},
    constants::{HELPER_EXE_NAME, PROVIDER_EXE_NAME, START_SCRIPT, list_url, user_app_url},
    environ::OwnershipTag,
    error::SupervisorError,
    launch::build_command_line,
    probe::{HealthProbe, HttpProbe, PollResult},
    process::{ProcessTable, SystemProcesses, filter_owned},
    status::{ProviderStatus, StatusReporter},
    worker::{self, WorkerHandle},
};

/// Where the supervisor stands with respect to its provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SupervisorState {
    /// Looking for a provider that is already running for us.
    Discovering,
    /// No provider found; launching one.
    Starting,
    /// A provider exists but has not answered a probe yet.
    StartedWaitingFirstContact,
    /// The provider answers probes.
    Connected,
    /// A connected provider stopped answering.
    Recovering,
    /// Launching is impossible without operator intervention.
    Fatal,
}

/// Sleeps between supervision steps. Swapped out in tests.
pub trait Clock: Send {
    fn sleep(&self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Launches a new provider process.
pub trait WorkerSpawner: Send {
    fn spawn(&mut self, tag: &OwnershipTag) -> Result<WorkerHandle, SupervisorError>;
}

/// Spawns the real provider: plans the command line, then launches it.
///
/// The plan is rebuilt on every launch so directories removed in the meantime are caught
/// before anything is started.
pub struct ProviderSpawner {
    config: ResolvedConfig,
}

impl ProviderSpawner {
    pub fn new(config: ResolvedConfig) -> Self {
        Self { config }
    }
}

impl WorkerSpawner for ProviderSpawner {
    fn spawn(&mut self, tag: &OwnershipTag) -> Result<WorkerHandle, SupervisorError> {
        let command_line = build_command_line(&self.config, std::process::id())?;
        Ok(worker::launch(command_line, tag, &self.config.exe_dir)?)
    }
}

/// Names, port and cadence of one supervision run.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub provider_exe: String,
    pub helper_exe: String,
    pub port: u16,
    pub timing: Timing,
}

impl SupervisorSettings {
    pub fn new(port: u16, timing: Timing) -> Self {
        Self {
            provider_exe: PROVIDER_EXE_NAME.to_string(),
            helper_exe: HELPER_EXE_NAME.to_string(),
            port,
            timing,
        }
    }

    /// URL of the provider's health and chart list endpoint.
    pub fn url(&self) -> String {
        list_url(self.port)
    }
}

/// The operating system facing collaborators of a [`Supervisor`].
pub struct Collaborators {
    pub processes: Box<dyn ProcessTable>,
    pub spawner: Box<dyn WorkerSpawner>,
    pub probe: Box<dyn HealthProbe>,
    pub clock: Box<dyn Clock>,
    pub reporter: Box<dyn StatusReporter>,
}

/// Keeps exactly one provider process alive and answering for this configuration.
pub struct Supervisor {
    settings: SupervisorSettings,
    tag: OwnershipTag,
    processes: Box<dyn ProcessTable>,
    spawner: Box<dyn WorkerSpawner>,
    probe: Box<dyn HealthProbe>,
    clock: Box<dyn Clock>,
    reporter: Box<dyn StatusReporter>,
    charts: ChartCache,
    shutdown: Arc<AtomicBool>,
    state: SupervisorState,
    /// Pid of the provider we launched or adopted last; `None` once known dead.
    provider_pid: Option<u32>,
    /// Present only for a provider we launched ourselves.
    worker: Option<WorkerHandle>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, tag: OwnershipTag, parts: Collaborators) -> Self {
        Self {
            settings,
            tag,
            processes: parts.processes,
            spawner: parts.spawner,
            probe: parts.probe,
            clock: parts.clock,
            reporter: parts.reporter,
            charts: ChartCache::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            state: SupervisorState::Discovering,
            provider_pid: None,
            worker: None,
        }
    }

    /// Wires a supervisor to the real process table, launcher, HTTP probe and clock.
    pub fn from_config(
        config: &ResolvedConfig,
        reporter: Box<dyn StatusReporter>,
    ) -> Result<Self, SupervisorError> {
        let settings = SupervisorSettings::new(config.port, config.timing);
        let tag = OwnershipTag::for_config_dir(&config.config_dir);
        let probe = HttpProbe::new(settings.url(), config.timing.probe_timeout)?;
        let parts = Collaborators {
            processes: Box::new(SystemProcesses::new(config.process_lister)),
            spawner: Box::new(ProviderSpawner::new(config.clone())),
            probe: Box::new(probe),
            clock: Box::new(SystemClock),
            reporter,
        };
        Ok(Self::new(settings, tag, parts))
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn tag(&self) -> &OwnershipTag {
        &self.tag
    }

    /// Pid of the provider currently believed to be ours.
    pub fn provider_pid(&self) -> Option<u32> {
        self.provider_pid
    }

    /// Shared view of the chart list, for consumers on other threads.
    pub fn charts(&self) -> ChartCache {
        self.charts.clone()
    }

    /// Flag that stops [`Supervisor::run`] at the next loop iteration when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn report(&mut self, status: ProviderStatus, detail: &str) {
        self.reporter.report(status, detail);
    }

    /// Finds our provider processes running `exe_name`.
    fn owned_processes(&self, exe_name: &str) -> Vec<u32> {
        let all = self.processes.scan(exe_name);
        let own = filter_owned(self.processes.as_ref(), &self.tag, &all, true);
        if own.len() != all.len() {
            let foreign: Vec<String> = all
                .iter()
                .filter(|record| !own.contains(record))
                .map(|record| record.pid.to_string())
                .collect();
            debug!(
                "{exe_name} processes not owned by us: {}",
                foreign.join(",")
            );
        }
        own.into_iter().map(|record| record.pid).collect()
    }

    /// Takes over an already running provider. Any handle of a provider we launched is
    /// dropped; that process is left alone.
    fn adopt(&mut self, pid: u32) {
        if self.provider_pid == Some(pid)
            && self.state == SupervisorState::StartedWaitingFirstContact
        {
            return;
        }
        info!("we already see a provider running with pid {pid}, trying this one");
        self.worker = None;
        self.provider_pid = Some(pid);
        self.state = SupervisorState::StartedWaitingFirstContact;
        let detail = format!(
            "provider started with pid {pid}, trying to connect at {}",
            self.settings.url()
        );
        self.report(ProviderStatus::Started, &detail);
    }

    /// Initial discovery: adopt the first owned provider, or move on to launching one.
    ///
    /// With several owned providers the first in scan order wins; the others are left
    /// running untouched.
    pub fn discover(&mut self) {
        let own = self.owned_processes(&self.settings.provider_exe);
        if own.len() > 1 {
            warn!(
                "{} providers are running for this configuration, using the first",
                own.len()
            );
        }
        match own.first() {
            Some(&pid) => self.adopt(pid),
            None => self.state = SupervisorState::Starting,
        }
    }

    /// Launches a provider and waits for it to settle.
    ///
    /// A failure is final: the state becomes [`SupervisorState::Fatal`] and the error is
    /// returned.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        info!("starting provider process");
        self.state = SupervisorState::Starting;
        self.report(
            ProviderStatus::Starting,
            &format!("starting provider process {START_SCRIPT}"),
        );
        let pid = self.launch()?;
        let detail = format!(
            "provider started with pid {pid}, connecting at {}",
            self.settings.url()
        );
        self.report(ProviderStatus::Started, &detail);
        Ok(())
    }

    fn launch(&mut self) -> Result<u32, SupervisorError> {
        match self.spawner.spawn(&self.tag) {
            Ok(handle) => {
                let pid = handle.pid;
                self.provider_pid = Some(pid);
                self.worker = Some(handle);
                self.clock.sleep(self.settings.timing.settle_delay);
                self.state = SupervisorState::StartedWaitingFirstContact;
                Ok(pid)
            }
            Err(err) => {
                error!("unable to start provider: {err}");
                self.report(
                    ProviderStatus::Error,
                    &format!("unable to start provider: {err}"),
                );
                self.state = SupervisorState::Fatal;
                Err(err)
            }
        }
    }

    /// Feeds one probe outcome into the state machine.
    ///
    /// Probe failures never end supervision; only a failed relaunch does.
    pub fn handle_poll(&mut self, result: PollResult) -> Result<(), SupervisorError> {
        match result {
            Ok(items) => {
                self.charts.replace(items);
                if self.state != SupervisorState::Connected {
                    info!("got first provider response");
                    let detail = format!(
                        "provider ({}) successfully connected at {}, charts at {}",
                        self.provider_pid
                            .map_or_else(|| "?".to_string(), |pid| pid.to_string()),
                        self.settings.url(),
                        user_app_url(self.settings.port)
                    );
                    self.report(ProviderStatus::Nmea, &detail);
                    self.state = SupervisorState::Connected;
                }
                Ok(())
            }
            Err(failure) => {
                debug!("error reading from provider: {failure}");
                if self.state == SupervisorState::Connected {
                    // Reported on the way out of Connected only, once per outage.
                    let detail = format!("lost connection at {}", self.settings.url());
                    error!("{detail}");
                    self.report(ProviderStatus::Error, &detail);
                    self.state = SupervisorState::Recovering;
                }
                self.recover()
            }
        }
    }

    /// Whether the provider we launched or adopted last is still ours and alive.
    fn last_provider_alive(&mut self) -> bool {
        if let Some(handle) = self.worker.as_mut()
            && let Some(exit) = handle.try_exit()
        {
            debug!("launched provider {} is gone", exit.pid);
            self.worker = None;
            if self.provider_pid == Some(exit.pid) {
                self.provider_pid = None;
            }
        }

        match self.provider_pid {
            Some(pid) => self.processes.resolve_tag(pid).as_deref() == Some(self.tag.as_str()),
            None => false,
        }
    }

    fn kill_helpers(&mut self) {
        for pid in self.owned_processes(&self.settings.helper_exe) {
            info!("killing background process {pid}");
            if let Err(err) = self.processes.kill(pid) {
                warn!("unable to kill background process {pid}: {err}");
            }
        }
    }

    /// Recovery after a failed probe: adopt a provider that showed up, wait for one that
    /// is still starting, or clean up helpers and launch a new one.
    fn recover(&mut self) -> Result<(), SupervisorError> {
        if let Some(&pid) = self.owned_processes(&self.settings.provider_exe).first() {
            self.adopt(pid);
            return Ok(());
        }

        if self.last_provider_alive() {
            debug!("provider executable not found, but started process is running, wait");
            return Ok(());
        }

        info!("no running provider found, trying to start");
        self.report(ProviderStatus::Started, "restarting provider");
        self.kill_helpers();
        let pid = self.launch()?;
        let detail = format!(
            "provider restarted with pid {pid}, trying to connect at {}",
            self.settings.url()
        );
        self.report(ProviderStatus::Started, &detail);
        Ok(())
    }

    /// Runs supervision until shutdown is requested or launching becomes impossible.
    ///
    /// The provider is left running on shutdown.
    pub fn run(&mut self) -> Result<(), SupervisorError> {
        if self.state == SupervisorState::Discovering {
            self.discover();
        }
        if self.state == SupervisorState::Starting {
            self.start()?;
        }

        info!("polling provider at {}", self.settings.url());

        while !self.shutdown_requested() {
            let result = self.probe.probe();
            self.handle_poll(result)?;
            if self.shutdown_requested() {
                break;
            }
            self.clock.sleep(self.settings.timing.poll_interval);
        }

        info!("supervision stopped, provider left running");
        Ok(())
    }
}
