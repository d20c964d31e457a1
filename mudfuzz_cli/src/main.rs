use mudfuzz_core::command::CommandRegistry;
use mudfuzz_core::config::MudfuzzConfig;
use mudfuzz_core::fuzzer::{FuzzerSetup, MudFuzzer};
use mudfuzz_core::observer::{FuzzerEvent, Observer};

use clap::Parser;
use std::io::BufRead;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// TOML or JSON configuration file.
    #[clap(short, long, value_parser, default_value = "config.toml")]
    config_file: PathBuf,
    /// Overrides `vocabulary.terms-dir` from the config file.
    #[clap(long)]
    terms_dir: Option<PathBuf>,
    /// Overrides `fuzzer.seed` for a reproducible run.
    #[clap(short, long)]
    seed: Option<u64>,
    /// Log filter used when RUST_LOG is not set.
    #[clap(long, default_value = "info")]
    log_level: String,
}

/// Requests typed on standard input while the fuzzer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Pause,
    Unpause,
    Quit,
}

impl Control {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "p" | "pause" => Some(Control::Pause),
            "u" | "unpause" | "resume" => Some(Control::Unpause),
            "q" | "quit" | "exit" => Some(Control::Quit),
            _ => None,
        }
    }
}

/// Headless front end: every engine event becomes a log line.
#[derive(Debug, Default)]
struct LoggingObserver {
    errors_seen: u64,
}

impl Observer for LoggingObserver {
    fn on_event(&mut self, event: &FuzzerEvent) {
        match event {
            FuzzerEvent::StateChanged(state) => info!(%state, "state changed"),
            FuzzerEvent::ReceivedText(text) => {
                let text = mudfuzz_core::corpus::strip_ansi(text).replace('\r', "");
                info!(target: "mudfuzz::recv", "{}", text.trim_end());
            }
            FuzzerEvent::ReceivedGarbled(len) => {
                warn!(target: "mudfuzz::recv", bytes = len, "received non-UTF-8 data")
            }
            FuzzerEvent::SentBuffer(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                info!(target: "mudfuzz::sent", "{:?}", text);
            }
            FuzzerEvent::ErrorDetected => {
                self.errors_seen += 1;
                error!(errors = self.errors_seen, "error pattern detected");
            }
            FuzzerEvent::ConnectionClosed => warn!("connection closed"),
        }
    }
}

fn spawn_stdin_reader() -> Receiver<Control> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("mudfuzz-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match Control::parse(&line) {
                    Some(control) => {
                        if tx.send(control).is_err() {
                            break;
                        }
                    }
                    None => warn!(input = %line.trim(), "unknown command (use p, u or q)"),
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "stdin control unavailable");
    }
    rx
}

fn apply_controls(fuzzer: &mut MudFuzzer, controls: &Receiver<Control>) -> ControlFlow<()> {
    loop {
        let control = match controls.try_recv() {
            Ok(control) => control,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        };
        let result = match control {
            Control::Pause => fuzzer.pause(),
            Control::Unpause => fuzzer.unpause(),
            Control::Quit => return ControlFlow::Break(()),
        };
        if let Err(e) = result {
            warn!(error = %e, "ignored {:?} request", control);
        }
    }
    if fuzzer.is_connection_closed() {
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let mut config = MudfuzzConfig::load_from_file(&cli.config_file)?;
    if let Some(terms_dir) = cli.terms_dir {
        config.vocabulary.terms_dir = Some(terms_dir);
    } else if let Some(relative) = config.vocabulary.terms_dir.clone() {
        // Relative term directories are resolved against the config file.
        if relative.is_relative() {
            if let Some(parent) = cli.config_file.parent() {
                config.vocabulary.terms_dir = Some(parent.join(relative));
            }
        }
    }
    if cli.seed.is_some() {
        config.fuzzer.seed = cli.seed;
    }

    let registry = CommandRegistry::with_builtins();
    let setup = FuzzerSetup::from_config(&config, &registry)?;
    info!(
        host = %setup.endpoint.host,
        port = setup.endpoint.port,
        actions = setup.actions.len(),
        terms = setup.vocabulary.terms.len(),
        "configuration loaded"
    );

    let mut fuzzer = MudFuzzer::new(setup, Box::new(LoggingObserver::default()));
    fuzzer.connect()?;

    let controls = spawn_stdin_reader();
    let period = config.fuzzer.tick_interval();
    fuzzer.run(period, |engine| apply_controls(engine, &controls));

    let stats = fuzzer.stats();
    info!(
        received = stats.texts_received,
        garbled = stats.garbled_received,
        errors = stats.errors_detected,
        sent = stats.buffers_sent,
        actions = stats.actions_run,
        "fuzzer stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudfuzz_core::connection::Connection;
    use mudfuzz_core::state::{FuzzerState, OperatingState, PauseCause};

    fn fuzzer_in_await_user() -> MudFuzzer {
        let config = MudfuzzConfig::from_toml_str(
            r#"
[connection]
host = "localhost"
port = 4000

[login]
user = "u"
password = "p"
user-prompt = "login:"
password-prompt = "password:"

[detection]
error-pattern = "ERROR"
"#,
        )
        .expect("config parses");
        let mut fuzzer = MudFuzzer::from_config(
            &config,
            &CommandRegistry::with_builtins(),
            Box::new(LoggingObserver::default()),
        )
        .expect("fuzzer builds");
        let (connection, _remote) = Connection::in_memory();
        fuzzer.connect_with(connection).expect("connect");
        fuzzer
    }

    #[test]
    fn control_lines_parse_short_and_long_forms() {
        assert_eq!(Control::parse("p"), Some(Control::Pause));
        assert_eq!(Control::parse(" resume \n"), Some(Control::Unpause));
        assert_eq!(Control::parse("quit"), Some(Control::Quit));
        assert_eq!(Control::parse("dance"), None);
    }

    #[test]
    fn apply_controls_pauses_unpauses_and_survives_usage_errors() {
        let mut fuzzer = fuzzer_in_await_user();
        let (tx, rx) = mpsc::channel();

        tx.send(Control::Pause).expect("send pause");
        tx.send(Control::Pause).expect("send second pause");
        assert_eq!(apply_controls(&mut fuzzer, &rx), ControlFlow::Continue(()));
        assert!(matches!(
            fuzzer.state(),
            FuzzerState::Paused(pause) if pause.cause == PauseCause::UserRequested
        ));

        tx.send(Control::Unpause).expect("send unpause");
        tx.send(Control::Unpause).expect("send second unpause");
        assert_eq!(apply_controls(&mut fuzzer, &rx), ControlFlow::Continue(()));
        assert_eq!(fuzzer.state(), FuzzerState::Active(OperatingState::AwaitUser));

        tx.send(Control::Quit).expect("send quit");
        assert_eq!(apply_controls(&mut fuzzer, &rx), ControlFlow::Break(()));
    }

    #[test]
    fn logging_observer_counts_errors() {
        let mut observer = LoggingObserver::default();
        observer.on_event(&FuzzerEvent::ErrorDetected);
        observer.on_event(&FuzzerEvent::ReceivedText("\x1b[31mhi\x1b[0m\r\n".to_string()));
        observer.on_event(&FuzzerEvent::ErrorDetected);
        assert_eq!(observer.errors_seen, 2);
    }
}
