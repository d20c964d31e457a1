//! The fuzzing engine: session state machine, inbound processing and action dispatch.
//!
//! [`MudFuzzer::tick`] is driven on a fixed cadence (see [`MudFuzzer::run`]). It
//! never blocks on I/O; it only polls the [`Connection`] queues. All state
//! transitions, memory updates and event emission happen on the tick caller's
//! thread, in order, and are reported to the single [`Observer`].

use crate::command::{CommandRegistry, FuzzContext};
use crate::config::{ConfigError, MudfuzzConfig};
use crate::connection::{Connection, ConnectionError, DEFAULT_READ_TIMEOUT, Poll};
use crate::corpus::MemoryCorpus;
use crate::observer::{FuzzerEvent, Observer};
use crate::oracle::TextOracle;
use crate::scheduler::ActionScheduler;
use crate::state::{FuzzerState, OperatingState, Pause, PauseCause};
use crate::vocabulary::Vocabulary;
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Invalid calls into the engine. The state is left untouched when one is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    #[error("Fuzzer is already paused ({})", .0.name())]
    AlreadyPaused(PauseCause),
    #[error("Fuzzer is not paused")]
    NotPaused,
    #[error("Fuzzer can only connect from START (currently {0})")]
    AlreadyConnected(FuzzerState),
}

#[derive(Error, Debug)]
pub enum FuzzerError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuzzerOptions {
    /// Suspend fuzzing when the error pattern matches.
    pub error_pause: bool,
    /// Upper bound on inbound buffers processed by one tick.
    pub max_reads_per_tick: usize,
    pub memory_capacity: usize,
    /// Seed for the action/command RNG; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for FuzzerOptions {
    fn default() -> Self {
        Self {
            error_pause: false,
            max_reads_per_tick: crate::config::default_max_reads_per_tick(),
            memory_capacity: crate::config::default_memory_capacity(),
            seed: None,
        }
    }
}

/// Everything needed to build a [`MudFuzzer`], validated.
#[derive(Debug)]
pub struct FuzzerSetup {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub oracle: TextOracle,
    pub actions: ActionScheduler,
    pub vocabulary: Vocabulary,
    pub options: FuzzerOptions,
}

impl FuzzerSetup {
    /// Compiles patterns, resolves weighted commands against `registry` and
    /// loads the vocabulary. Any failure here is fatal.
    pub fn from_config(
        config: &MudfuzzConfig,
        registry: &CommandRegistry,
    ) -> Result<Self, ConfigError> {
        let oracle = TextOracle::from_config(config)?;
        let actions = registry.resolve(&config.fuzz_cmds)?;
        let vocabulary = Vocabulary::from_settings(&config.vocabulary)?;
        Ok(Self {
            endpoint: Endpoint {
                host: config.connection.host.clone(),
                port: config.connection.port,
                read_timeout: config.connection.read_timeout(),
            },
            credentials: Credentials {
                user: config.login.user.clone(),
                password: config.login.password.clone(),
            },
            oracle,
            actions,
            vocabulary,
            options: FuzzerOptions {
                error_pause: config.detection.error_pause,
                max_reads_per_tick: config.fuzzer.max_reads_per_tick,
                memory_capacity: config.fuzzer.memory_capacity,
                seed: config.fuzzer.seed,
            },
        })
    }
}

/// Running counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FuzzerStats {
    pub texts_received: u64,
    pub garbled_received: u64,
    pub errors_detected: u64,
    pub buffers_sent: u64,
    pub actions_run: u64,
}

/// The part of the engine fuzz commands are allowed to touch.
struct Session {
    connection: Option<Connection>,
    memory: MemoryCorpus,
    vocabulary: Arc<Vocabulary>,
    rng: ChaCha8Rng,
    observer: Box<dyn Observer>,
    stats: FuzzerStats,
}

impl Session {
    fn emit(&mut self, event: FuzzerEvent) {
        self.observer.on_event(&event);
    }
}

impl FuzzContext for Session {
    fn send_string(&mut self, text: &str) {
        self.send_buffer(text.as_bytes());
    }

    fn send_buffer(&mut self, bytes: &[u8]) {
        let Some(connection) = &self.connection else {
            return;
        };
        connection.write(bytes.to_vec());
        self.stats.buffers_sent += 1;
        self.emit(FuzzerEvent::SentBuffer(bytes.to_vec()));
    }

    fn random_remembered_word(&mut self) -> String {
        self.memory.random_word(&mut self.rng).to_string()
    }

    fn vocabulary(&self) -> Arc<Vocabulary> {
        Arc::clone(&self.vocabulary)
    }

    fn rng(&mut self) -> &mut dyn RngCore {
        &mut self.rng
    }
}

pub struct MudFuzzer {
    state: FuzzerState,
    endpoint: Endpoint,
    credentials: Credentials,
    oracle: TextOracle,
    actions: ActionScheduler,
    error_pause: bool,
    max_reads_per_tick: usize,
    connection_closed: bool,
    session: Session,
}

impl MudFuzzer {
    pub fn new(setup: FuzzerSetup, observer: Box<dyn Observer>) -> Self {
        let FuzzerSetup {
            endpoint,
            credentials,
            oracle,
            actions,
            vocabulary,
            options,
        } = setup;
        let seed = options.seed.unwrap_or_else(rand::random);
        Self {
            state: FuzzerState::default(),
            endpoint,
            credentials,
            oracle,
            actions,
            error_pause: options.error_pause,
            max_reads_per_tick: options.max_reads_per_tick.max(1),
            connection_closed: false,
            session: Session {
                connection: None,
                memory: MemoryCorpus::new(options.memory_capacity),
                vocabulary: Arc::new(vocabulary),
                rng: ChaCha8Rng::seed_from_u64(seed),
                observer,
                stats: FuzzerStats::default(),
            },
        }
    }

    pub fn from_config(
        config: &MudfuzzConfig,
        registry: &CommandRegistry,
        observer: Box<dyn Observer>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(FuzzerSetup::from_config(config, registry)?, observer))
    }

    pub fn state(&self) -> FuzzerState {
        self.state
    }

    pub fn stats(&self) -> FuzzerStats {
        self.session.stats
    }

    pub fn memory(&self) -> &MemoryCorpus {
        &self.session.memory
    }

    pub fn actions(&self) -> &ActionScheduler {
        &self.actions
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// `true` once the connection has closed and every delivered buffer was processed.
    pub fn is_connection_closed(&self) -> bool {
        self.connection_closed
    }

    fn change_state(&mut self, state: FuzzerState) {
        self.state = state;
        self.session.emit(FuzzerEvent::StateChanged(state));
    }

    /// Opens a TCP connection to the configured endpoint and starts awaiting the user prompt.
    pub fn connect(&mut self) -> Result<(), FuzzerError> {
        let connection = Connection::tcp(
            &self.endpoint.host,
            self.endpoint.port,
            self.endpoint.read_timeout,
        );
        self.connect_with(connection)
    }

    /// Like [`MudFuzzer::connect`], over a caller-supplied connection.
    pub fn connect_with(&mut self, mut connection: Connection) -> Result<(), FuzzerError> {
        if !self.state.is_active(OperatingState::Start) {
            return Err(UsageError::AlreadyConnected(self.state).into());
        }
        self.change_state(FuzzerState::Active(OperatingState::Connecting));
        connection.connect()?;
        self.session.connection = Some(connection);
        self.change_state(FuzzerState::Active(OperatingState::AwaitUser));
        Ok(())
    }

    /// Suspends fuzzing at the user's request.
    pub fn pause(&mut self) -> Result<(), UsageError> {
        self.pause_with(PauseCause::UserRequested)
    }

    fn pause_with(&mut self, cause: PauseCause) -> Result<(), UsageError> {
        match self.state {
            FuzzerState::Paused(pause) => Err(UsageError::AlreadyPaused(pause.cause)),
            FuzzerState::Active(resume_target) => {
                self.enter_pause(cause, resume_target);
                Ok(())
            }
        }
    }

    fn enter_pause(&mut self, cause: PauseCause, resume_target: OperatingState) {
        self.change_state(FuzzerState::Paused(Pause {
            cause,
            resume_target,
        }));
    }

    /// Restores the operating state captured when the pause began.
    pub fn unpause(&mut self) -> Result<(), UsageError> {
        match self.state {
            FuzzerState::Active(_) => Err(UsageError::NotPaused),
            FuzzerState::Paused(pause) => {
                self.change_state(FuzzerState::Active(pause.resume_target));
                Ok(())
            }
        }
    }

    /// One step of the engine.
    ///
    /// Does nothing without a connection, after the connection closed, or while
    /// paused (inbound data is left queued). Otherwise drains up to
    /// `max_reads_per_tick` inbound buffers in arrival order and, if the session
    /// is then fuzzing, runs one weighted-random action.
    pub fn tick(&mut self) {
        if self.connection_closed || self.state.is_paused() {
            return;
        }

        for _ in 0..self.max_reads_per_tick {
            let poll = match &self.session.connection {
                Some(connection) => connection.poll(),
                None => return,
            };
            match poll {
                Poll::Data(buffer) => {
                    if self.process_incoming(buffer).is_break() {
                        return;
                    }
                }
                Poll::Empty => break,
                Poll::Closed => {
                    self.connection_closed = true;
                    self.session.emit(FuzzerEvent::ConnectionClosed);
                    return;
                }
            }
        }

        if self.state.is_active(OperatingState::Fuzzing) {
            self.run_random_action();
        }
    }

    /// Handles one inbound buffer. Breaks when an error pause must end this tick's drain.
    fn process_incoming(&mut self, buffer: Vec<u8>) -> ControlFlow<()> {
        let text = match String::from_utf8(buffer) {
            Ok(text) => text,
            Err(e) => {
                self.session.stats.garbled_received += 1;
                self.session
                    .emit(FuzzerEvent::ReceivedGarbled(e.as_bytes().len()));
                return ControlFlow::Continue(());
            }
        };

        if !text.is_empty() {
            self.session.stats.texts_received += 1;
            self.session.emit(FuzzerEvent::ReceivedText(text.clone()));
        }

        if self.oracle.detects_error(&text) {
            self.session.stats.errors_detected += 1;
            self.session.emit(FuzzerEvent::ErrorDetected);
            if self.error_pause {
                if let FuzzerState::Active(resume_target) = self.state {
                    self.enter_pause(PauseCause::ErrorDetected, resume_target);
                }
                return ControlFlow::Break(());
            }
        }

        match self.state {
            FuzzerState::Active(OperatingState::AwaitUser)
                if self.oracle.matches_user_prompt(&text) =>
            {
                let user = self.credentials.user.clone();
                self.session.send_string(&user);
                self.session.send_eol();
                self.change_state(FuzzerState::Active(OperatingState::AwaitPass));
            }
            FuzzerState::Active(OperatingState::AwaitPass)
                if self.oracle.matches_password_prompt(&text) =>
            {
                let password = self.credentials.password.clone();
                self.session.send_string(&password);
                self.session.send_eol();
                self.change_state(FuzzerState::Active(OperatingState::Fuzzing));
            }
            FuzzerState::Active(OperatingState::Fuzzing) => {
                self.session.memory.remember(&text);
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn run_random_action(&mut self) {
        let Some(action) = self.actions.next(&mut self.session.rng) else {
            return;
        };
        self.session.stats.actions_run += 1;
        action.command().execute(&mut self.session);
    }

    /// Ticks every `period` until `control` breaks.
    ///
    /// `control` runs before each tick with full access to the engine, which is
    /// where a front end applies pause/unpause requests or decides to stop.
    pub fn run<F>(&mut self, period: Duration, mut control: F)
    where
        F: FnMut(&mut Self) -> ControlFlow<()>,
    {
        loop {
            let started = Instant::now();
            if control(self).is_break() {
                return;
            }
            self.tick();
            if let Some(remaining) = period.checked_sub(started.elapsed()) {
                thread::sleep(remaining);
            }
        }
    }
}

impl std::fmt::Debug for MudFuzzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MudFuzzer")
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .field("stats", &self.session.stats)
            .field("connection_closed", &self.connection_closed)
            .finish()
    }
}
