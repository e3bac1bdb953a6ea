//! Output pattern watcher.
//!
//! Classifies live terminal output into alert categories. Each chunk is
//! stripped of control sequences and checked against every category; a
//! category that matched recently is held back by a per-category cooldown.

mod rules;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use clawterm_core::ansi::strip_ansi;
use clawterm_core::config::WatcherConfig;
use clawterm_core::{Alert, AlertCategory};

use rules::CATEGORIES;

/// The rolling context is trimmed once it grows past this many characters...
pub const CONTEXT_MAX_CHARS: usize = 4096;
/// ...down to this many trailing characters.
pub const CONTEXT_KEEP_CHARS: usize = 2048;

const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Stateful classifier over the terminal output stream.
///
/// Only the current chunk is matched; the rolling context is kept for
/// callers that want recent plain text.
pub struct PatternWatcher {
    cooldown: Duration,
    last_emitted: HashMap<AlertCategory, Instant>,
    context: String,
    context_chars: usize,
    alert_tx: broadcast::Sender<Alert>,
}

impl PatternWatcher {
    pub fn new(cooldown: Duration) -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            cooldown,
            last_emitted: HashMap::new(),
            context: String::new(),
            context_chars: 0,
            alert_tx,
        }
    }

    pub fn from_config(config: &WatcherConfig) -> Self {
        Self::new(Duration::from_secs(config.cooldown_secs))
    }

    /// Accepted alerts, one message per alert.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Alert> {
        self.feed_at(chunk, Instant::now())
    }

    /// Classify `chunk` as if it arrived at `now`. Returns the accepted alerts,
    /// which have also been published to subscribers.
    pub fn feed_at(&mut self, chunk: &[u8], now: Instant) -> Vec<Alert> {
        let text = strip_ansi(chunk);
        self.push_context(&text);

        CATEGORIES
            .iter()
            .filter_map(|rules| {
                let matched = rules.first_match(&text)?;
                self.emit(rules.category, matched, now)
            })
            .collect()
    }

    /// Recent plain-text output, at most [`CONTEXT_MAX_CHARS`] characters.
    pub fn recent_text(&self) -> &str {
        &self.context
    }

    /// Consume the bridge's output feed until it closes.
    pub async fn run(mut self, mut output: broadcast::Receiver<Bytes>) {
        loop {
            match output.recv().await {
                Ok(chunk) => {
                    self.feed(&chunk);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Watcher fell behind output, chunks skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Output feed closed, watcher stopped");
    }

    fn emit(&mut self, category: AlertCategory, matched: &str, now: Instant) -> Option<Alert> {
        if let Some(&last) = self.last_emitted.get(&category)
            && now.saturating_duration_since(last) < self.cooldown
        {
            debug!(%category, matched, "Alert suppressed by cooldown");
            return None;
        }
        self.last_emitted.insert(category, now);

        let alert = Alert::new(category, matched);
        info!(%category, matched, "Alert");
        let _ = self.alert_tx.send(alert.clone());
        Some(alert)
    }

    fn push_context(&mut self, text: &str) {
        self.context.push_str(text);
        self.context_chars += text.chars().count();
        if self.context_chars <= CONTEXT_MAX_CHARS {
            return;
        }
        let skip = self.context_chars - CONTEXT_KEEP_CHARS;
        let cut = self
            .context
            .char_indices()
            .nth(skip)
            .map_or(self.context.len(), |(i, _)| i);
        self.context.drain(..cut);
        self.context_chars = CONTEXT_KEEP_CHARS;
    }
}
