//! Multi-actor pool.
//!
//! Spawns N actor threads against one learner server and gathers their
//! stats.

use super::actor::{Actor, ActorConfig, ActorHandle};
use crate::core::step::ActorId;
use crate::environment::{PaintEnvironment, Policy};
use crate::messages::ActorStats;
use crate::transport::{Connector, ReconnectPolicy};

/// Configuration for actor pool.
#[derive(Debug, Clone)]
pub struct ActorPoolConfig {
    pub num_actors: usize,
    pub rollout_length: usize,
    pub weight_sync_interval: usize,
    pub emit_frames: bool,
    pub frame_buffer: usize,
    /// Per-actor rollout limit (0 = unlimited).
    pub max_rollouts: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for ActorPoolConfig {
    fn default() -> Self {
        Self {
            num_actors: 4,
            rollout_length: 20,
            weight_sync_interval: 1,
            emit_frames: true,
            frame_buffer: 4,
            max_rollouts: 0,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ActorPoolConfig {
    /// Config for one actor of the pool.
    pub fn actor_config(&self, actor_id: ActorId) -> ActorConfig {
        ActorConfig {
            actor_id,
            rollout_length: self.rollout_length,
            weight_sync_interval: self.weight_sync_interval,
            emit_frames: self.emit_frames,
            frame_buffer: self.frame_buffer,
            max_rollouts: self.max_rollouts,
            reconnect: self.reconnect.clone(),
        }
    }
}

/// Running actor threads.
pub struct ActorPool {
    handles: Vec<ActorHandle>,
    config: ActorPoolConfig,
}

impl ActorPool {
    /// Spawn `num_actors` actors, ids `0..num_actors`.
    pub fn spawn<E, P, FE, FP>(
        config: ActorPoolConfig,
        connector: &Connector,
        mut env_factory: FE,
        mut policy_factory: FP,
    ) -> Self
    where
        E: PaintEnvironment + 'static,
        P: Policy + 'static,
        FE: FnMut(ActorId) -> E,
        FP: FnMut(ActorId) -> P,
    {
        let handles = (0..config.num_actors)
            .map(|id| {
                Actor::spawn(
                    config.actor_config(id),
                    env_factory(id),
                    policy_factory(id),
                    connector.clone(),
                )
            })
            .collect();
        log::info!("spawned {} actors", config.num_actors);
        Self { handles, config }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn config(&self) -> &ActorPoolConfig {
        &self.config
    }

    pub fn stop_all(&self) {
        for handle in &self.handles {
            handle.stop();
        }
    }

    pub fn request_stats(&self) {
        for handle in &self.handles {
            handle.request_stats();
        }
    }

    /// Stats replies received so far (non-blocking).
    pub fn collect_stats(&self) -> Vec<ActorStats> {
        let mut all_stats = Vec::new();
        for handle in &self.handles {
            while let Some(stats) = handle.get_stats() {
                all_stats.push(stats);
            }
        }
        all_stats
    }

    pub fn finished_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_finished()).count()
    }

    /// Stop every actor and wait for them. Panicked actors are logged and
    /// left out.
    pub fn join_all(self) -> Vec<ActorStats> {
        self.stop_all();
        self.handles
            .into_iter()
            .filter_map(|h| {
                let id = h.actor_id;
                match h.join() {
                    Ok(stats) => Some(stats),
                    Err(_) => {
                        log::error!("actor {} panicked", id);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Sum of per-actor stats. The average return is weighted by valid
/// episodes.
pub fn aggregate_stats(stats: &[ActorStats]) -> ActorStats {
    let mut total = ActorStats::default();
    let mut weighted_return = 0.0f32;
    for s in stats {
        total.steps += s.steps;
        total.episodes += s.episodes;
        total.valid_episodes += s.valid_episodes;
        total.filtered_episodes += s.filtered_episodes;
        total.rollouts_submitted += s.rollouts_submitted;
        total.rollouts_discarded += s.rollouts_discarded;
        total.rollouts_dropped += s.rollouts_dropped;
        total.frame_pairs_submitted += s.frame_pairs_submitted;
        total.frame_pairs_dropped += s.frame_pairs_dropped;
        total.reconnects += s.reconnects;
        total.weight_version = total.weight_version.max(s.weight_version);
        weighted_return += s.avg_episode_return * s.valid_episodes as f32;
    }
    if total.valid_episodes > 0 {
        total.avg_episode_return = weighted_return / total.valid_episodes as f32;
    }
    total.recent_episode_return = stats.last().map(|s| s.recent_episode_return).unwrap_or(0.0);
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_config_from_pool_config() {
        let pool_config = ActorPoolConfig {
            num_actors: 4,
            rollout_length: 8,
            weight_sync_interval: 3,
            emit_frames: false,
            frame_buffer: 2,
            max_rollouts: 10,
            reconnect: ReconnectPolicy::default(),
        };

        let actor_config = pool_config.actor_config(2);
        assert_eq!(actor_config.actor_id, 2);
        assert_eq!(actor_config.rollout_length, 8);
        assert_eq!(actor_config.weight_sync_interval, 3);
        assert!(!actor_config.emit_frames);
        assert_eq!(actor_config.frame_buffer, 2);
        assert_eq!(actor_config.max_rollouts, 10);
    }

    #[test]
    fn test_aggregate_weights_by_valid_episodes() {
        let mut a = ActorStats::new(0);
        a.record_episode(10.0);
        a.add_steps(5);
        let mut b = ActorStats::new(1);
        b.record_episode(20.0);
        b.record_episode(30.0);
        b.add_steps(7);
        b.weight_version = 4;

        let total = aggregate_stats(&[a, b]);
        assert_eq!(total.steps, 12);
        assert_eq!(total.episodes, 3);
        assert_eq!(total.weight_version, 4);
        assert!((total.avg_episode_return - 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_aggregate_of_nothing() {
        assert_eq!(aggregate_stats(&[]), ActorStats::default());
    }
}
