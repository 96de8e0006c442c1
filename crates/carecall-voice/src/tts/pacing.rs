use crate::config::PacingConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Keeps delivered audio within a bounded lead of real-time playback.
///
/// Every frame sent advances the playback position by one frame duration.
/// Before a send, if the audio already delivered runs further ahead of wall
/// time (measured from the first frame) than `max_ahead`, the caller sleeps
/// off the excess. Pacing never drops or reorders frames.
#[derive(Debug)]
pub struct Pacer {
    frame: Duration,
    max_ahead: Duration,
    started: Option<Instant>,
    sent: Duration,
}

impl Pacer {
    pub fn new(config: &PacingConfig) -> Self {
        Self {
            frame: Duration::from_millis(u64::from(config.frame_ms)),
            max_ahead: config.max_ahead(),
            started: None,
            sent: Duration::ZERO,
        }
    }

    /// How far delivered audio runs ahead of wall time right now.
    pub fn lead(&self) -> Duration {
        match self.started {
            Some(start) => self.sent.saturating_sub(start.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Audio duration recorded as delivered.
    pub fn sent(&self) -> Duration {
        self.sent
    }

    /// Sleeps until the lead is back within bounds.
    pub async fn wait_turn(&self) {
        let lead = self.lead();
        if lead > self.max_ahead {
            tokio::time::sleep(lead - self.max_ahead).await;
        }
    }

    /// Records `frames` as delivered. The clock starts on the first record.
    pub fn record(&mut self, frames: usize) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.sent += self.frame * frames as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_groups_go_out_without_waiting() {
        let mut pacer = Pacer::new(&PacingConfig::default());
        let begin = Instant::now();
        pacer.wait_turn().await;
        pacer.record(5);
        pacer.wait_turn().await;
        pacer.record(5);
        assert_eq!(begin.elapsed(), Duration::ZERO);
        assert_eq!(pacer.lead(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn excess_lead_is_slept_off() {
        let mut pacer = Pacer::new(&PacingConfig::default());
        let begin = Instant::now();
        for _ in 0..3 {
            pacer.wait_turn().await;
            pacer.record(5);
        }
        // 300ms delivered at t=0: the next send waits 100ms.
        pacer.wait_turn().await;
        let waited = begin.elapsed();
        assert!(waited >= Duration::from_millis(100), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(105), "waited {:?}", waited);
        assert!(pacer.lead() <= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn lead_shrinks_as_time_passes() {
        let mut pacer = Pacer::new(&PacingConfig::default());
        pacer.record(10);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let lead = pacer.lead();
        assert!(lead <= Duration::from_millis(50) && lead >= Duration::from_millis(45));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pacer.lead(), Duration::ZERO);
        assert_eq!(pacer.sent(), Duration::from_millis(200));
    }
}
