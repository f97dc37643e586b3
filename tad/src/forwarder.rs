//! Forwarder tasks, named drop, reorder and delay policies in front of a send queue.
//!
//! Every packet handed to a task passes three stages before it is scheduled on the task's
//! send queue:
//!
//! 1. The drop stage discards it with some probability. A dropped packet is not an error.
//! 2. The reorder stage picks its send time inside a window of `[lo, hi)`. The window starts
//!    at the arrival of the first packet of a round and spans two thirds of the reorder timeout.
//!    `Random` draws uniformly from the window, `Reversed` counts down from `hi` by one
//!    microsecond per packet. A round ends after `size` packets.
//! 3. The delay stage adds a constant or random delay.
//!
//! Policies are plain serde types so that they can be read from JSON:
//!
//! ```
//! use tad::forwarder::{DropMode, TaskPolicy};
//! let policy: TaskPolicy = serde_json::from_str(r#"{
//!     "drop": { "mode": "random", "rate": 10 },
//!     "delay": { "mode": "constant", "us": 500 }
//! }"#).unwrap();
//! assert_eq!(policy.drop, DropMode::Random { rate: 10 });
//! ```
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::sendq::SendQueue;
use crate::time::{Duration, Instant};
use crate::{Error, Result};

/// The drop stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DropMode {
    /// Never drop.
    Disabled,
    /// Drop with a probability of `rate` percent.
    Random {
        /// Percentage within `0..=100`.
        rate: u8,
    },
    /// Drop by a pattern of packet numbers, not supported.
    Pattern,
}

/// How the reorder stage chooses send times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReorderMode {
    /// Send immediately.
    Disabled,
    /// Uniformly inside the window.
    Random,
    /// Counting down from the end of the window.
    Reversed,
}

/// The reorder stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderPolicy {
    /// How to choose send times.
    pub mode: ReorderMode,
    /// Length of a round in microseconds, the window covers two thirds of it.
    pub timeout_us: u64,
    /// Number of packets in a round.
    pub size: u32,
}

/// The delay stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DelayMode {
    /// No delay.
    Disabled,
    /// A fixed delay.
    Constant {
        /// The delay in microseconds.
        us: u64,
    },
    /// Uniformly distributed within `[min_us, max_us]`.
    ContRandom {
        /// Smallest delay in microseconds.
        min_us: u64,
        /// Largest delay in microseconds.
        max_us: u64,
    },
    /// One of several delays, each with a probability in percent.
    DiscreteRandom {
        /// Pairs of percentage and delay in microseconds, the percentages sum to 100.
        choices: Vec<(u8, u64)>,
    },
}

/// The complete policy of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPolicy {
    /// The drop stage.
    pub drop: DropMode,
    /// The reorder stage.
    pub reorder: ReorderPolicy,
    /// The delay stage.
    pub delay: DelayMode,
}

impl Default for ReorderPolicy {
    fn default() -> Self {
        ReorderPolicy { mode: ReorderMode::Disabled, timeout_us: 0, size: 0 }
    }
}

impl Default for TaskPolicy {
    fn default() -> Self {
        TaskPolicy {
            drop: DropMode::Disabled,
            reorder: ReorderPolicy::default(),
            delay: DelayMode::Disabled,
        }
    }
}

impl TaskPolicy {
    /// Check the policy for consistency.
    pub fn validate(&self) -> Result<()> {
        match self.drop {
            DropMode::Random { rate } if rate > 100 => {
                return Err(Error::invalid(format!("drop rate of {}%", rate)));
            },
            DropMode::Pattern => return Err(Error::Unsupported("pattern drop mode")),
            _ => (),
        }

        if self.reorder.mode != ReorderMode::Disabled && self.reorder.size == 0 {
            return Err(Error::invalid("reorder round without packets"));
        }

        match &self.delay {
            DelayMode::ContRandom { min_us, max_us } if min_us > max_us => {
                Err(Error::invalid(format!("delay range {}..{} is empty", min_us, max_us)))
            },
            DelayMode::DiscreteRandom { choices } => {
                let total: u32 = choices.iter().map(|&(prob, _)| u32::from(prob)).sum();
                if total != 100 {
                    return Err(Error::invalid(format!("delay probabilities sum to {}%", total)));
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }
}

/// What happened to a processed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Discarded by the drop stage.
    Dropped,
    /// Scheduled on the send queue.
    Queued(Instant),
}

/// A named forwarding policy bound to a send queue.
pub struct Task {
    name: String,
    policy: TaskPolicy,
    sendq: Arc<SendQueue>,
    state: Mutex<TaskState>,
}

struct TaskState {
    rng: StdRng,
    reordered: u32,
    lo: Instant,
    hi: Instant,
    dropped: u64,
    forwarded: u64,
}

impl Task {
    /// Create a task.
    ///
    /// The random stages are seeded with `seed`, or from the operating system.
    pub fn new(name: &str, policy: TaskPolicy, sendq: Arc<SendQueue>, seed: Option<u64>)
        -> Result<Self>
    {
        policy.validate()?;
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Task {
            name: name.to_owned(),
            policy,
            sendq,
            state: Mutex::new(TaskState {
                rng,
                reordered: 0,
                lo: Instant::from_micros(0),
                hi: Instant::from_micros(0),
                dropped: 0,
                forwarded: 0,
            }),
        })
    }

    /// The name of the task.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy of the task.
    pub fn policy(&self) -> &TaskPolicy {
        &self.policy
    }

    /// The send queue packets are scheduled on.
    pub fn sendq(&self) -> &Arc<SendQueue> {
        &self.sendq
    }

    /// The number of packets dropped so far.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    /// The number of packets handed to the send queue so far.
    pub fn forwarded(&self) -> u64 {
        self.lock().forwarded
    }

    /// Pass one packet through the stages of the policy.
    pub fn process(&self, frame: &[u8]) -> Result<Disposition> {
        let now = Instant::now();
        let mut state = self.lock();

        if let DropMode::Random { rate } = self.policy.drop {
            if state.rng.gen_range(0..100u8) < rate {
                state.dropped += 1;
                tracing::trace!(task = %self.name, "packet dropped");
                return Ok(Disposition::Dropped);
            }
        }

        let mut at = self.reorder(&mut state, now);
        at += self.delay(&mut state.rng);

        self.sendq.enqueue(frame.to_vec(), at)?;
        state.forwarded += 1;
        Ok(Disposition::Queued(at))
    }

    fn reorder(&self, state: &mut TaskState, now: Instant) -> Instant {
        let policy = &self.policy.reorder;
        if policy.mode == ReorderMode::Disabled {
            return now;
        }

        if state.reordered == 0 {
            state.lo = now;
            state.hi = now + Duration::from_micros((u128::from(policy.timeout_us) * 2 / 3) as u64);
        }

        let at = match policy.mode {
            ReorderMode::Random if state.lo < state.hi => {
                let span = (state.hi - state.lo).as_micros() as u64;
                state.lo + Duration::from_micros(state.rng.gen_range(0..span))
            },
            ReorderMode::Reversed => {
                let at = state.hi;
                state.hi = state.hi - Duration::from_micros(1);
                at
            },
            _ => state.lo,
        };

        state.reordered += 1;
        if state.reordered >= policy.size {
            state.reordered = 0;
        }
        at
    }

    fn delay(&self, rng: &mut StdRng) -> Duration {
        let micros = match &self.policy.delay {
            DelayMode::Disabled => 0,
            DelayMode::Constant { us } => *us,
            DelayMode::ContRandom { min_us, max_us } => rng.gen_range(*min_us..=*max_us),
            DelayMode::DiscreteRandom { choices } => {
                let mut roll = rng.gen_range(0..100u8);
                choices.iter()
                    .find(|&&(prob, _)| {
                        if roll < prob {
                            true
                        } else {
                            roll -= prob;
                            false
                        }
                    })
                    .map_or(0, |&(_, us)| us)
            },
        };
        Duration::from_micros(micros)
    }

    fn lock(&self) -> MutexGuard<TaskState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nic::FnHandler;

    fn sendq(max_size: usize) -> Arc<SendQueue> {
        let writer = FnHandler(|_: &[u8]| Ok(()));
        Arc::new(SendQueue::new("fwd", Box::new(writer), max_size, 0).unwrap())
    }

    fn task(policy: TaskPolicy) -> Task {
        Task::new("test", policy, sendq(4096), Some(0x7ad)).unwrap()
    }

    #[test]
    fn drop_everything() {
        let task = task(TaskPolicy { drop: DropMode::Random { rate: 100 }, ..TaskPolicy::default() });
        for _ in 0..100 {
            assert_eq!(task.process(&[0; 64]).unwrap(), Disposition::Dropped);
        }
        assert_eq!(task.dropped(), 100);
        assert_eq!(task.forwarded(), 0);
        assert!(task.sendq().is_empty());
    }

    #[test]
    fn drop_nothing() {
        let task = task(TaskPolicy { drop: DropMode::Random { rate: 0 }, ..TaskPolicy::default() });
        for _ in 0..100 {
            assert!(matches!(task.process(&[0; 64]).unwrap(), Disposition::Queued(_)));
        }
        assert_eq!(task.forwarded(), 100);
    }

    #[test]
    fn drop_rate_converges() {
        let task = task(TaskPolicy {
            drop: DropMode::Random { rate: 30 },
            delay: DelayMode::Constant { us: 60_000_000 },
            ..TaskPolicy::default()
        });
        for _ in 0..4000 {
            task.process(&[0]).unwrap();
        }
        // Four standard errors of 4000 draws at 30%.
        let dropped = task.dropped();
        assert!((1_088..=1_312).contains(&dropped), "dropped {}", dropped);
    }

    #[test]
    fn reversed_counts_down() {
        let task = task(TaskPolicy {
            reorder: ReorderPolicy { mode: ReorderMode::Reversed, timeout_us: 30_000_000, size: 4 },
            ..TaskPolicy::default()
        });
        let times: Vec<Instant> = (0..4)
            .map(|_| match task.process(&[1]).unwrap() {
                Disposition::Queued(at) => at,
                Disposition::Dropped => unreachable!(),
            })
            .collect();
        for pair in times.windows(2) {
            assert_eq!(pair[0] - pair[1], Duration::from_micros(1));
        }
        // The fifth packet starts a new round.
        match task.process(&[1]).unwrap() {
            Disposition::Queued(at) => assert!(at >= times[0]),
            Disposition::Dropped => unreachable!(),
        }
    }

    #[test]
    fn unbounded_window() {
        let task = task(TaskPolicy {
            reorder: ReorderPolicy { mode: ReorderMode::Reversed, timeout_us: u64::MAX, size: 2 },
            ..TaskPolicy::default()
        });
        let now = Instant::now();
        match task.process(&[1]).unwrap() {
            Disposition::Queued(at) => assert!(at > now + Duration::from_secs(3600)),
            Disposition::Dropped => unreachable!(),
        }
    }

    #[test]
    fn random_stays_in_window() {
        let task = task(TaskPolicy {
            reorder: ReorderPolicy { mode: ReorderMode::Random, timeout_us: 3_000_000, size: 50 },
            ..TaskPolicy::default()
        });
        let start = Instant::now();
        for _ in 0..50 {
            match task.process(&[1]).unwrap() {
                Disposition::Queued(at) => {
                    assert!(at >= start);
                    assert!(at < Instant::now() + Duration::from_secs(2));
                },
                Disposition::Dropped => unreachable!(),
            }
        }
    }

    #[test]
    fn delays() {
        let task = task(TaskPolicy {
            delay: DelayMode::DiscreteRandom { choices: vec![(50, 1_000_000), (50, 2_000_000)] },
            ..TaskPolicy::default()
        });
        for _ in 0..20 {
            let before = Instant::now();
            match task.process(&[1]).unwrap() {
                Disposition::Queued(at) => {
                    let delay = at - before;
                    assert!(delay >= Duration::from_secs(1) && delay < Duration::from_millis(2_100));
                },
                Disposition::Dropped => unreachable!(),
            }
        }
    }

    #[test]
    fn rejected_policies() {
        let policy = |drop, delay| TaskPolicy { drop, delay, ..TaskPolicy::default() };
        assert_eq!(
            policy(DropMode::Pattern, DelayMode::Disabled).validate(),
            Err(Error::Unsupported("pattern drop mode")));
        assert!(matches!(
            policy(DropMode::Random { rate: 101 }, DelayMode::Disabled).validate(),
            Err(Error::Invalid(_))));
        assert!(matches!(
            policy(DropMode::Disabled, DelayMode::DiscreteRandom { choices: vec![(60, 1)] }).validate(),
            Err(Error::Invalid(_))));
        assert!(matches!(
            policy(DropMode::Disabled, DelayMode::ContRandom { min_us: 5, max_us: 1 }).validate(),
            Err(Error::Invalid(_))));
    }

    #[test]
    fn full_queue_surfaces() {
        let task = Task::new("small", TaskPolicy {
            delay: DelayMode::Constant { us: 60_000_000 },
            ..TaskPolicy::default()
        }, sendq(1), None).unwrap();
        task.process(&[1]).unwrap();
        assert_eq!(task.process(&[2]), Err(Error::NoBuffer));
    }
}
