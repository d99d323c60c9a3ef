//! Rebuild trigger policies.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::live::Mutation;

/// Decides when the coordinator starts a rebuild.
///
/// The coordinator polls `triggered` on every turn of its loop and drops
/// the future whenever another event wins, so implementations must be
/// cancel-safe: an interrupted wait must not lose a trigger.
#[async_trait]
pub trait Policy<X>: Send {
    /// Resolves when a rebuild should start.
    async fn triggered(&mut self);

    /// Called with every mutation as the coordinator accepts it.
    fn observe(&mut self, _mutation: &Mutation<X>) {}
}

/// Triggers a rebuild at a fixed tempo, ignoring mutation traffic.
///
/// The first trigger fires one tempo after the first wait. Ticks missed
/// while the coordinator was busy are not replayed in a burst.
#[derive(Debug)]
pub struct TempoPolicy {
    tempo: Duration,
    interval: Option<Interval>,
}

impl TempoPolicy {
    pub const DEFAULT_TEMPO: Duration = Duration::from_secs(1);

    /// A zero tempo is raised to one millisecond.
    pub fn new(tempo: Duration) -> Self {
        Self {
            tempo: tempo.max(Duration::from_millis(1)),
            interval: None,
        }
    }

    pub fn tempo(&self) -> Duration {
        self.tempo
    }
}

impl Default for TempoPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TEMPO)
    }
}

#[async_trait]
impl<X: Send + Sync> Policy<X> for TempoPolicy {
    async fn triggered(&mut self) {
        let tempo = self.tempo;
        let interval = self.interval.get_or_insert_with(|| {
            let mut interval = time::interval_at(Instant::now() + tempo, tempo);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        interval.tick().await;
    }
}
