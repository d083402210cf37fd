//! Deficit weighted round-robin over (platform, target) pairs
//!
//! On every tick each schedulable earns its weight-of-the-moment as credit.
//! The one with the most credit wins and pays back the total credit handed
//! out in that tick, so the credits always sum to zero and, in the long run,
//! a schedulable with weight `w` is chosen `w / Σw` of the time.

use std::collections::{BTreeMap, HashMap};
use tracing::{trace, warn};

use crate::models::{weight_key, Target};

/// Credit given to a freshly inserted schedulable so it is polled soon
pub const NEW_SCHEDULABLE_WEIGHT: i64 = 1000;

/// One (platform, target) pair and its accumulated credit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedulable {
    pub platform_name: String,
    pub target: Target,
    pub current_weight: i64,
    pub use_batch: bool,
}

impl Schedulable {
    pub fn new(platform_name: impl Into<String>, target: Target, use_batch: bool) -> Self {
        Self {
            platform_name: platform_name.into(),
            target,
            current_weight: 0,
            use_batch,
        }
    }

    pub fn key(&self) -> String {
        weight_key(&self.platform_name, &self.target)
    }
}

/// Selection state of one scheduler
#[derive(Debug, Clone, Default)]
pub struct WeightedRoundRobin {
    schedulables: Vec<Schedulable>,
    /// Credit granted or revoked by insertions and deletions since the last tick
    pre_weight_val: i64,
    /// Targets of each batch-polled platform
    batch_targets: BTreeMap<String, Vec<Target>>,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with pre-existing schedulables, all starting with zero credit
    pub fn with_schedulables(schedulables: Vec<Schedulable>) -> Self {
        let mut wrr = Self::new();
        for s in &schedulables {
            if s.use_batch {
                wrr.batch_targets
                    .entry(s.platform_name.clone())
                    .or_default()
                    .push(s.target.clone());
            }
        }
        wrr.schedulables = schedulables;
        wrr
    }

    pub fn schedulables(&self) -> &[Schedulable] {
        &self.schedulables
    }

    pub fn len(&self) -> usize {
        self.schedulables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulables.is_empty()
    }

    pub fn pre_weight_val(&self) -> i64 {
        self.pre_weight_val
    }

    /// Sum of the credits of all schedulables
    pub fn total_current_weight(&self) -> i64 {
        self.schedulables.iter().map(|s| s.current_weight).sum()
    }

    /// Run one tick and return the winner
    ///
    /// `weights` maps `"{platform_name}-{target}"` to the weight of the
    /// moment; missing keys count as zero. Ties go to the earliest entry.
    pub fn select(&mut self, weights: &HashMap<String, u32>) -> Option<Schedulable> {
        if self.schedulables.is_empty() {
            return None;
        }

        let mut weight_sum = self.pre_weight_val;
        self.pre_weight_val = 0;

        // (index, credit) of the leader so far; strict `>` keeps the earliest on ties
        let mut best: Option<(usize, i64)> = None;
        for (index, schedulable) in self.schedulables.iter_mut().enumerate() {
            let key = schedulable.key();
            let weight = match weights.get(&key) {
                Some(w) => i64::from(*w),
                None => {
                    warn!(key = %key, "No weight configured, treating as zero");
                    0
                }
            };
            schedulable.current_weight += weight;
            weight_sum += weight;

            match best {
                Some((_, leading)) if leading >= schedulable.current_weight => {}
                _ => best = Some((index, schedulable.current_weight)),
            }
        }

        let (index, _) = best?;
        let chosen = &mut self.schedulables[index];
        chosen.current_weight -= weight_sum;
        trace!(
            platform = %chosen.platform_name,
            target = %chosen.target,
            current_weight = chosen.current_weight,
            weight_sum = weight_sum,
            "Selected schedulable"
        );
        Some(chosen.clone())
    }

    /// Add a schedulable with a head start; no-op if already present
    pub fn insert(&mut self, platform_name: &str, target: &Target, use_batch: bool) -> bool {
        if self.position(platform_name, target).is_some() {
            return false;
        }

        self.schedulables.push(Schedulable {
            platform_name: platform_name.to_string(),
            target: target.clone(),
            current_weight: NEW_SCHEDULABLE_WEIGHT,
            use_batch,
        });
        self.pre_weight_val += NEW_SCHEDULABLE_WEIGHT;

        if use_batch {
            self.batch_targets
                .entry(platform_name.to_string())
                .or_default()
                .push(target.clone());
        }
        true
    }

    /// Remove a schedulable and revoke its credit; `None` if absent
    pub fn remove(&mut self, platform_name: &str, target: &Target) -> Option<Schedulable> {
        let index = self.position(platform_name, target)?;
        let removed = self.schedulables.remove(index);
        self.pre_weight_val -= removed.current_weight;

        if removed.use_batch {
            if let Some(targets) = self.batch_targets.get_mut(platform_name) {
                targets.retain(|t| t != target);
                if targets.is_empty() {
                    self.batch_targets.remove(platform_name);
                }
            }
        }
        Some(removed)
    }

    /// Every target polled together on a batch platform
    pub fn batch_group(&self, platform_name: &str) -> Vec<Target> {
        self.batch_targets
            .get(platform_name)
            .cloned()
            .unwrap_or_default()
    }

    fn position(&self, platform_name: &str, target: &Target) -> Option<usize> {
        self.schedulables
            .iter()
            .position(|s| s.platform_name == platform_name && &s.target == target)
    }
}
