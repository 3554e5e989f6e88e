//! Affirmation pool and trigger timing.
//!
//! The pool is synthesized once per session and never regenerated. Each
//! position update may surface one clip, chosen uniformly at random, once
//! `affirmation_interval` seconds of playback have passed since the last one.

use crate::generation::GeneratedAffirmation;
use crate::sessions::{Affirmation, AffirmationId, SessionId};
use chrono::Utc;
use rand::Rng;

#[derive(Debug)]
pub struct AffirmationScheduler {
    interval: f64,
    last_fired: f64,
    pool: Vec<Affirmation>,
    /// False until synthesis has reported back
    ready: bool,
}

impl AffirmationScheduler {
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            last_fired: 0.0,
            pool: Vec::new(),
            ready: false,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn last_fired(&self) -> f64 {
        self.last_fired
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn pool(&self) -> &[Affirmation] {
        &self.pool
    }

    /// Install the synthesized pool. Returns how many clips it holds.
    pub fn load(&mut self, session_id: &SessionId, clips: Vec<GeneratedAffirmation>) -> usize {
        let created_at = Utc::now();
        self.pool = clips
            .into_iter()
            .enumerate()
            .map(|(n, clip)| Affirmation {
                id: AffirmationId::for_session(session_id, n),
                handle: clip.handle,
                text: clip.text,
                duration: clip.duration,
                created_at,
            })
            .collect();
        self.ready = true;
        self.pool.len()
    }

    pub fn get(&self, id: &AffirmationId) -> Option<&Affirmation> {
        self.pool.iter().find(|a| &a.id == id)
    }

    /// Feed a playback position; returns the clip to play, if one is due.
    ///
    /// A backward seek below the last trigger pulls the trigger time down to
    /// the new position, so the next clip comes one full interval later.
    pub fn observe(&mut self, session_id: &SessionId, position: f64) -> Option<&Affirmation> {
        if position < self.last_fired {
            tracing::debug!(
                session.id = %session_id,
                position,
                last_fired = self.last_fired,
                "Backward seek, resetting affirmation clock"
            );
            self.last_fired = position;
        }

        if position - self.last_fired < self.interval {
            return None;
        }

        if self.pool.is_empty() {
            if self.ready {
                tracing::warn!(session.id = %session_id, position, "Affirmation due but pool is empty");
            } else {
                tracing::debug!(session.id = %session_id, position, "Affirmation due, pool still synthesizing");
            }
            return None;
        }

        let pick = rand::rng().random_range(0..self.pool.len());
        self.last_fired = position;
        self.pool.get(pick)
    }

    /// Remove the whole pool, for cleanup.
    pub fn drain(&mut self) -> Vec<Affirmation> {
        std::mem::take(&mut self.pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas::ContentHash;

    fn clips(n: usize) -> Vec<GeneratedAffirmation> {
        (0..n)
            .map(|i| GeneratedAffirmation {
                handle: ContentHash::from_data(format!("clip {}", i).as_bytes()),
                text: format!("affirmation {}", i),
                duration: 2.0,
            })
            .collect()
    }

    fn loaded(interval: f64, n: usize) -> (SessionId, AffirmationScheduler) {
        let id = SessionId::new("s");
        let mut scheduler = AffirmationScheduler::new(interval);
        scheduler.load(&id, clips(n));
        (id, scheduler)
    }

    #[test]
    fn test_fires_once_per_interval() {
        let (id, mut s) = loaded(30.0, 3);
        assert!(s.observe(&id, 29.0).is_none());
        assert!(s.observe(&id, 30.0).is_some());
        assert!(s.observe(&id, 59.0).is_none());
        assert!(s.observe(&id, 60.0).is_some());
        assert_eq!(s.last_fired(), 60.0);
    }

    #[test]
    fn test_increasing_positions_never_fire_faster_than_interval() {
        let (id, mut s) = loaded(30.0, 2);
        let mut fired = Vec::new();
        let mut position = 0.0;
        while position < 600.0 {
            if s.observe(&id, position).is_some() {
                fired.push(position);
            }
            position += 7.3;
        }
        assert!(!fired.is_empty());
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= 30.0);
        }
    }

    #[test]
    fn test_empty_pool_never_fires() {
        let (id, mut s) = loaded(10.0, 0);
        assert!(s.is_ready());
        assert!(s.observe(&id, 100.0).is_none());
        assert_eq!(s.last_fired(), 0.0);
    }

    #[test]
    fn test_unloaded_pool_never_fires() {
        let id = SessionId::new("s");
        let mut s = AffirmationScheduler::new(10.0);
        assert!(!s.is_ready());
        assert!(s.observe(&id, 100.0).is_none());
    }

    #[test]
    fn test_backward_seek_clamps() {
        let (id, mut s) = loaded(30.0, 1);
        assert!(s.observe(&id, 90.0).is_some());
        assert!(s.observe(&id, 40.0).is_none());
        assert_eq!(s.last_fired(), 40.0);
        assert!(s.observe(&id, 69.0).is_none());
        assert!(s.observe(&id, 70.0).is_some());
    }

    #[test]
    fn test_ids_and_lookup() {
        let (id, s) = loaded(30.0, 2);
        let second = AffirmationId::for_session(&id, 1);
        assert_eq!(s.get(&second).unwrap().text, "affirmation 1");
        assert!(s.get(&AffirmationId::new("nope")).is_none());
    }
}
