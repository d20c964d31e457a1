pub mod command;
pub mod config;
pub mod connection;
pub mod corpus;
pub mod fuzzer;
pub mod observer;
pub mod oracle;
pub mod scheduler;
pub mod state;
pub mod vocabulary;

pub use command::{CommandRegistry, FuzzCommand, FuzzContext};
pub use config::{ConfigError, MudfuzzConfig};
pub use connection::{Connection, ConnectionError, Poll, RemoteEnd};
pub use corpus::MemoryCorpus;
pub use fuzzer::{FuzzerError, FuzzerSetup, FuzzerStats, MudFuzzer, UsageError};
pub use observer::{EventLog, FuzzerEvent, NoOpObserver, Observer};
pub use oracle::TextOracle;
pub use scheduler::{ActionScheduler, RegisteredAction};
pub use state::{FuzzerState, OperatingState, Pause, PauseCause};
pub use vocabulary::Vocabulary;
