use parley_core::AgentId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    speaker: AgentId,
    text: String,
    sequence: u64,
}

impl Utterance {
    pub fn speaker(&self) -> &AgentId {
        &self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn render(&self) -> String {
        format!("{}: {}", self.speaker, self.text)
    }
}

/// Founding entries plus the most recent tail that are shown to the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipWindow {
    pub keep_first: usize,
    pub keep_last: usize,
}

impl ClipWindow {
    pub fn new(keep_first: usize, keep_last: usize) -> Self {
        Self { keep_first, keep_last }
    }

    pub fn bound(&self) -> usize {
        self.keep_first.saturating_add(self.keep_last)
    }
}

impl Default for ClipWindow {
    fn default() -> Self {
        Self { keep_first: 1, keep_last: 5 }
    }
}

/// Append-only record of a negotiation as seen by one agent.
///
/// Clipping produces a borrowed view; the stored history is only ever
/// discarded through [`ConversationLog::reset`].
#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    utterances: Vec<Utterance>,
    next_sequence: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, speaker: AgentId, text: impl Into<String>) -> &Utterance {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.utterances.push(Utterance { speaker, text: text.into(), sequence });
        &self.utterances[self.utterances.len() - 1]
    }

    pub fn snapshot(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn clip(&self, window: ClipWindow) -> Vec<&Utterance> {
        if self.utterances.len() <= window.bound() {
            return self.utterances.iter().collect();
        }

        let tail_start = self.utterances.len() - window.keep_last;
        self.utterances[..window.keep_first]
            .iter()
            .chain(self.utterances[tail_start..].iter())
            .collect()
    }

    /// Prompt-context form of the clipped log, one `speaker: text` line per utterance.
    pub fn render(&self, window: ClipWindow) -> String {
        self.clip(window).into_iter().map(Utterance::render).collect::<Vec<_>>().join("\n")
    }

    pub fn reset(&mut self) {
        self.utterances.clear();
        self.next_sequence = 0;
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parley_core::{AgentId, Role};

    use super::{ClipWindow, ConversationLog};

    fn log_of(len: usize) -> ConversationLog {
        let mut log = ConversationLog::new();
        for index in 0..len {
            let role = if index % 2 == 0 { Role::Seller } else { Role::Buyer };
            log.append(AgentId::new(role, 1), format!("message {index}"));
        }
        log
    }

    #[test]
    fn append_assigns_increasing_sequence() {
        let mut log = ConversationLog::new();
        let first = log.append(AgentId::new(Role::Seller, 1), "hello").sequence();
        let second = log.append(AgentId::new(Role::Buyer, 2), "hi").sequence();

        assert_eq!((first, second), (0, 1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshot()[1].speaker().as_str(), "buyer_2");
    }

    #[test]
    fn clip_keeps_founding_entry_and_recent_tail() {
        let log = log_of(9);
        let clipped = log.clip(ClipWindow::default());

        let sequences: Vec<u64> = clipped.iter().map(|utterance| utterance.sequence()).collect();
        assert_eq!(sequences, vec![0, 4, 5, 6, 7, 8]);
        assert_eq!(log.len(), 9);
    }

    #[test]
    fn clip_bounds_hold_for_every_length_and_window() {
        for len in 0..24 {
            for keep_first in 0..3 {
                for keep_last in 0..7 {
                    let window = ClipWindow::new(keep_first, keep_last);
                    let log = log_of(len);
                    let clipped = log.clip(window);

                    assert!(clipped.len() <= window.bound());
                    if len <= window.bound() {
                        assert_eq!(clipped.len(), len, "short log returned unchanged");
                    } else {
                        assert_eq!(clipped.len(), window.bound());
                    }
                    if keep_first == 1 && len > 0 {
                        assert_eq!(clipped[0].sequence(), 0, "first utterance retained");
                    }
                    assert!(
                        clipped.windows(2).all(|pair| pair[0].sequence() < pair[1].sequence()),
                        "order preserved"
                    );
                    assert_eq!(log.len(), len, "clip never mutates the log");
                }
            }
        }
    }

    #[test]
    fn render_joins_speaker_lines() {
        let mut log = ConversationLog::new();
        log.append(AgentId::new(Role::Seller, 1), "1.2 ETH, final offer");
        log.append(AgentId::new(Role::Buyer, 2), "0.6 ETH");

        assert_eq!(
            log.render(ClipWindow::default()),
            "seller_1: 1.2 ETH, final offer\nbuyer_2: 0.6 ETH"
        );
        assert_eq!(ConversationLog::new().render(ClipWindow::default()), "");
    }

    #[test]
    fn reset_clears_history_and_sequence() {
        let mut log = log_of(3);
        log.reset();
        assert!(log.is_empty());

        let utterance = log.append(AgentId::new(Role::Seller, 1), "fresh start");
        assert_eq!(utterance.sequence(), 0);
    }
}
