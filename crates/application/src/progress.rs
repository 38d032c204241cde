//! Progress reporting plumbing.
//!
//! Performers and collaborators report raw 0-100 percentages into a
//! [`ProgressSender`]; the executor consumes the channel on the other
//! end, persists the step progress and pushes a notification per tick.
//! A sender can be rescaled into a band (`scaled(30, 80)`) so a
//! sub-operation's 0-100 maps onto its slice of the step.

use tokio::sync::mpsc;

/// Cloneable progress handle. Reports are fire-and-forget: a dropped
/// receiver just swallows ticks.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<u8>,
    lo: u8,
    hi: u8,
}

impl ProgressSender {
    /// Create a channel pair; the receiver side belongs to the executor.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<u8>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx, lo: 0, hi: 100 }, rx)
    }

    /// A sender whose 0-100 input maps onto `[lo, hi]` of the parent
    /// scale.
    pub fn scaled(&self, lo: u8, hi: u8) -> Self {
        debug_assert!(lo <= hi && hi <= 100);
        // compose with the current band so nested rescaling works
        let span = (self.hi - self.lo) as u32;
        let abs_lo = self.lo + ((lo as u32 * span) / 100) as u8;
        let abs_hi = self.lo + ((hi as u32 * span) / 100) as u8;
        Self {
            tx: self.tx.clone(),
            lo: abs_lo,
            hi: abs_hi,
        }
    }

    /// Report a raw percentage (clamped to 100) in this sender's scale.
    pub async fn report(&self, percent: u8) {
        let p = percent.min(100) as u32;
        let span = (self.hi - self.lo) as u32;
        let value = self.lo + ((p * span) / 100) as u8;
        let _ = self.tx.send(value).await;
    }
}
