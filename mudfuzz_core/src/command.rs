//! Fuzz commands and the registry that resolves them from configuration.
//!
//! A fuzz command is a small, stateless unit that acts on a [`FuzzContext`]:
//! it sends strings or raw bytes and may read the remembered-word memory and
//! the configured vocabulary. Commands are registered under a stable string key
//! and bound to selection weights at startup by [`CommandRegistry::resolve`].

use crate::config::ConfigError;
use crate::scheduler::{ActionScheduler, RegisteredAction};
use crate::vocabulary::Vocabulary;
use rand::Rng;
use rand::seq::IndexedRandom;
use rand_core::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Line terminator used for every command the fuzzer types.
pub const EOL: &str = "\r\n";

/// What a fuzz command may do to the engine.
pub trait FuzzContext {
    /// UTF-8 encodes `text` and queues it for sending.
    fn send_string(&mut self, text: &str);

    fn send_eol(&mut self) {
        self.send_string(EOL);
    }

    /// Queues raw bytes, which need not be valid UTF-8.
    fn send_buffer(&mut self, bytes: &[u8]);

    /// A uniformly chosen remembered word, or the fallback token when memory is empty.
    fn random_remembered_word(&mut self) -> String;

    fn vocabulary(&self) -> Arc<Vocabulary>;

    fn rng(&mut self) -> &mut dyn RngCore;
}

/// A pluggable fuzz action.
pub trait FuzzCommand {
    fn name(&self) -> &'static str;
    fn execute(&self, ctx: &mut dyn FuzzContext);
}

fn space_or_eol(rng: &mut dyn RngCore) -> &'static str {
    if rng.random_bool(0.5) { " " } else { EOL }
}

/// Sends a random valid command followed by a space, leaving the line open.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendCommand;

impl FuzzCommand for SendCommand {
    fn name(&self) -> &'static str {
        "send_command"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        let vocabulary = ctx.vocabulary();
        if let Some(command) = vocabulary.valid_commands.choose(ctx.rng()) {
            ctx.send_string(command);
            ctx.send_string(" ");
        }
    }
}

/// Sends a random valid word followed by a space.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendWord;

impl FuzzCommand for SendWord {
    fn name(&self) -> &'static str {
        "send_word"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        let vocabulary = ctx.vocabulary();
        if let Some(word) = vocabulary.valid_words.choose(ctx.rng()) {
            ctx.send_string(word);
            ctx.send_string(" ");
        }
    }
}

/// Terminates any pending line, then looks around, sometimes at a remembered word.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendLook;

impl FuzzCommand for SendLook {
    fn name(&self) -> &'static str {
        "send_look"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        ctx.send_eol();
        ctx.send_string("look");
        if ctx.rng().random_bool(0.5) {
            let word = ctx.random_remembered_word();
            ctx.send_string(" ");
            ctx.send_string(&word);
        }
        ctx.send_eol();
    }
}

/// Echoes a remembered word back, followed by a space or a line end.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendRememberedWord;

impl FuzzCommand for SendRememberedWord {
    fn name(&self) -> &'static str {
        "send_remembered_word"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        let word = ctx.random_remembered_word();
        ctx.send_string(&word);
        let separator = space_or_eol(ctx.rng());
        ctx.send_string(separator);
    }
}

/// Sends a random term from a random category, followed by a space or a line end.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendTerm;

impl FuzzCommand for SendTerm {
    fn name(&self) -> &'static str {
        "send_term"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        let vocabulary = ctx.vocabulary();
        let categories: Vec<&Vec<String>> = vocabulary.terms.values().collect();
        let Some(terms) = categories.choose(ctx.rng()) else {
            return;
        };
        if let Some(term) = terms.choose(ctx.rng()) {
            ctx.send_string(term);
            let separator = space_or_eol(ctx.rng());
            ctx.send_string(separator);
        }
    }
}

/// Maximum payload size for [`SendRandomBytes`].
pub const MAX_RANDOM_BYTES: usize = 1024;

/// Sends between 0 and [`MAX_RANDOM_BYTES`] uniformly random bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendRandomBytes;

impl FuzzCommand for SendRandomBytes {
    fn name(&self) -> &'static str {
        "send_random_bytes"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        let len = ctx.rng().random_range(0..=MAX_RANDOM_BYTES);
        let mut payload = vec![0u8; len];
        ctx.rng().fill_bytes(&mut payload);
        ctx.send_buffer(&payload);
    }
}

/// Stalls the tick loop for a random duration below `max`, letting server output pile up.
#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    pub max: Duration,
}

impl Default for Sleep {
    fn default() -> Self {
        Self {
            max: Duration::from_secs(3),
        }
    }
}

impl FuzzCommand for Sleep {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn execute(&self, ctx: &mut dyn FuzzContext) {
        let fraction: f64 = ctx.rng().random();
        std::thread::sleep(self.max.mul_f64(fraction));
    }
}

pub type CommandFactory = fn() -> Box<dyn FuzzCommand>;

/// Maps stable string keys to fuzz command constructors.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    factories: BTreeMap<String, CommandFactory>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// A registry holding every built-in command under its `name()`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("send_command", || Box::new(SendCommand));
        registry.register("send_word", || Box::new(SendWord));
        registry.register("send_look", || Box::new(SendLook));
        registry.register("send_remembered_word", || Box::new(SendRememberedWord));
        registry.register("send_term", || Box::new(SendTerm));
        registry.register("send_random_bytes", || Box::new(SendRandomBytes));
        registry.register("sleep", || Box::new(Sleep::default()));
        registry
    }

    /// Registers `factory` under `key`, replacing any previous registration.
    pub fn register(&mut self, key: impl Into<String>, factory: CommandFactory) -> &mut Self {
        self.factories.insert(key.into(), factory);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Binds configured weights to registered commands.
    ///
    /// Fails on the first identifier with no registration, on an invalid weight,
    /// or when the weights sum to infinity.
    pub fn resolve(&self, weights: &BTreeMap<String, f64>) -> Result<ActionScheduler, ConfigError> {
        let mut actions = Vec::with_capacity(weights.len());
        for (id, &weight) in weights {
            let factory = self
                .factories
                .get(id)
                .ok_or_else(|| ConfigError::UnknownCommand(id.clone()))?;
            actions.push(RegisteredAction::new(id.clone(), weight, factory())?);
        }
        ActionScheduler::new(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{FALLBACK_WORD, MemoryCorpus};
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    /// A context that records sends instead of touching a connection.
    struct RecordingContext {
        sent: Vec<Vec<u8>>,
        memory: MemoryCorpus,
        vocabulary: Arc<Vocabulary>,
        rng: ChaCha8Rng,
    }

    impl RecordingContext {
        fn new(vocabulary: Vocabulary, seed: u8) -> Self {
            Self {
                sent: Vec::new(),
                memory: MemoryCorpus::new(16),
                vocabulary: Arc::new(vocabulary),
                rng: ChaCha8Rng::from_seed([seed; 32]),
            }
        }

        fn sent_text(&self) -> String {
            self.sent
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .collect()
        }
    }

    impl FuzzContext for RecordingContext {
        fn send_string(&mut self, text: &str) {
            self.send_buffer(text.as_bytes());
        }

        fn send_buffer(&mut self, bytes: &[u8]) {
            self.sent.push(bytes.to_vec());
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

    fn sample_vocabulary() -> Vocabulary {
        let mut terms = BTreeMap::new();
        terms.insert("directions".to_string(), vec!["north".to_string()]);
        Vocabulary {
            valid_commands: vec!["say".to_string()],
            valid_words: vec!["lantern".to_string()],
            terms,
        }
    }

    #[test]
    fn send_command_and_send_word_use_vocabulary() {
        let mut ctx = RecordingContext::new(sample_vocabulary(), 1);
        SendCommand.execute(&mut ctx);
        SendWord.execute(&mut ctx);
        assert_eq!(
            ctx.sent,
            vec![b"say".to_vec(), b" ".to_vec(), b"lantern".to_vec(), b" ".to_vec()]
        );
    }

    #[test]
    fn vocabulary_commands_send_nothing_without_vocabulary() {
        let mut ctx = RecordingContext::new(Vocabulary::default(), 2);
        SendCommand.execute(&mut ctx);
        SendWord.execute(&mut ctx);
        SendTerm.execute(&mut ctx);
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn send_look_wraps_look_in_line_ends() {
        let mut ctx = RecordingContext::new(Vocabulary::default(), 3);
        for _ in 0..20 {
            ctx.sent.clear();
            SendLook.execute(&mut ctx);
            let text = ctx.sent_text();
            assert!(
                text == "\r\nlook\r\n" || text == format!("\r\nlook {FALLBACK_WORD}\r\n"),
                "unexpected look output {text:?}"
            );
        }
    }

    #[test]
    fn send_remembered_word_uses_memory_and_a_separator() {
        let mut ctx = RecordingContext::new(Vocabulary::default(), 4);
        ctx.memory.remember("Dragon");
        SendRememberedWord.execute(&mut ctx);
        assert_eq!(ctx.sent[0], b"dragon".to_vec());
        assert!(ctx.sent[1] == b" ".to_vec() || ctx.sent[1] == EOL.as_bytes().to_vec());
    }

    #[test]
    fn send_term_draws_from_a_category() {
        let mut ctx = RecordingContext::new(sample_vocabulary(), 5);
        SendTerm.execute(&mut ctx);
        assert_eq!(ctx.sent[0], b"north".to_vec());
        assert_eq!(ctx.sent.len(), 2);
    }

    #[test]
    fn send_random_bytes_stays_within_bounds() {
        let mut ctx = RecordingContext::new(Vocabulary::default(), 6);
        for _ in 0..50 {
            SendRandomBytes.execute(&mut ctx);
        }
        assert_eq!(ctx.sent.len(), 50);
        assert!(ctx.sent.iter().all(|buffer| buffer.len() <= MAX_RANDOM_BYTES));
    }

    #[test]
    fn sleep_respects_its_maximum_and_sends_nothing() {
        let mut ctx = RecordingContext::new(Vocabulary::default(), 7);
        let sleep = Sleep {
            max: Duration::from_millis(5),
        };
        let started = std::time::Instant::now();
        sleep.execute(&mut ctx);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn builtin_keys_match_command_names() {
        let registry = CommandRegistry::with_builtins();
        let keys: Vec<&str> = registry.keys().collect();
        assert_eq!(keys.len(), 7);
        for key in keys {
            let mut weights = BTreeMap::new();
            weights.insert(key.to_string(), 1.0);
            let scheduler = registry.resolve(&weights).expect("builtin resolves");
            assert_eq!(scheduler.actions()[0].command().name(), key);
        }
    }

    #[test]
    fn resolve_fails_fast_on_unknown_command() {
        let registry = CommandRegistry::with_builtins();
        let mut weights = BTreeMap::new();
        weights.insert("send_look".to_string(), 1.0);
        weights.insert("teleport".to_string(), 1.0);
        match registry.resolve(&weights) {
            Err(ConfigError::UnknownCommand(id)) => assert_eq!(id, "teleport"),
            other => panic!("Expected UnknownCommand, got {other:?}"),
        }
    }

    #[test]
    fn resolve_rejects_weights_that_sum_to_infinity() {
        let registry = CommandRegistry::with_builtins();
        let mut weights = BTreeMap::new();
        weights.insert("send_look".to_string(), f64::MAX);
        weights.insert("send_word".to_string(), f64::MAX);
        match registry.resolve(&weights) {
            Err(ConfigError::WeightOverflow { total }) => assert!(total.is_infinite()),
            other => panic!("Expected WeightOverflow, got {other:?}"),
        }
    }

    #[test]
    fn custom_commands_can_be_registered() {
        struct Shout;
        impl FuzzCommand for Shout {
            fn name(&self) -> &'static str {
                "shout"
            }
            fn execute(&self, ctx: &mut dyn FuzzContext) {
                ctx.send_string("SHOUT");
                ctx.send_eol();
            }
        }

        let mut registry = CommandRegistry::new();
        registry.register("shout", || Box::new(Shout));
        assert!(registry.contains("shout"));

        let mut weights = BTreeMap::new();
        weights.insert("shout".to_string(), 2.0);
        let scheduler = registry.resolve(&weights).expect("shout resolves");
        let mut rng = ChaCha8Rng::from_seed([8; 32]);
        let mut ctx = RecordingContext::new(Vocabulary::default(), 8);
        scheduler
            .next(&mut rng)
            .expect("positive weight")
            .command()
            .execute(&mut ctx);
        assert_eq!(ctx.sent_text(), "SHOUT\r\n");
    }
}
