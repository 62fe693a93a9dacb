//! Visibility Scheduler
//!
//! Pending-image work queue. Each tick takes a snapshot of the queue,
//! decides per image whether it loads now, keeps waiting, or is already
//! handled, and then drops everything that is no longer pending.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Verdict for one queued image on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Hand it to the loader and leave the queue
    Load,
    /// Leave it queued for a later tick
    Wait,
    /// Already loaded elsewhere; leave the queue without loading
    Drop,
}

/// Outcome of evaluating the queue once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPlan<I> {
    /// Images to load now, in queue order
    pub ready: Vec<I>,
    /// Images still waiting after this tick, in queue order
    pub pending: Vec<I>,
    /// Images that left the queue without loading
    pub dropped: Vec<I>,
}

impl<I> TickPlan<I> {
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.dropped.is_empty()
    }
}

/// FIFO queue of images waiting to load.
///
/// The queue does not exist until the first collection; after that it is
/// only extended, never rebuilt.
pub struct VisibilityScheduler<I> {
    queue: Option<Vec<I>>,
}

impl<I> Default for VisibilityScheduler<I> {
    fn default() -> Self {
        Self { queue: None }
    }
}

impl<I: Clone + Eq + Hash> VisibilityScheduler<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether candidates were ever collected
    pub fn is_collected(&self) -> bool {
        self.queue.is_some()
    }

    /// Whether this tick must ask the host for candidates
    pub fn needs_collection(&self, force_rescan: bool) -> bool {
        force_rescan || self.queue.is_none()
    }

    /// Append new candidates, skipping images already queued or already
    /// loaded. Returns how many were added.
    pub fn merge<F>(&mut self, candidates: Vec<I>, mut is_loaded: F) -> usize
    where
        F: FnMut(&I) -> bool,
    {
        let queue = self.queue.get_or_insert_with(Vec::new);
        let before = queue.len();
        let mut queued: HashSet<I> = queue.iter().cloned().collect();

        for candidate in candidates {
            if is_loaded(&candidate) || !queued.insert(candidate.clone()) {
                continue;
            }
            queue.push(candidate);
        }

        queue.len() - before
    }

    pub fn len(&self) -> usize {
        self.queue.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued images, front to back
    pub fn pending(&self) -> &[I] {
        self.queue.as_deref().unwrap_or(&[])
    }

    /// Evaluate a snapshot of the queue, front to back
    pub fn plan<F>(&self, mut decide: F) -> TickPlan<I>
    where
        F: FnMut(&I) -> Decision,
    {
        let mut plan = TickPlan {
            ready: Vec::new(),
            pending: Vec::new(),
            dropped: Vec::new(),
        };

        for image in self.pending() {
            match decide(image) {
                Decision::Load => plan.ready.push(image.clone()),
                Decision::Wait => plan.pending.push(image.clone()),
                Decision::Drop => plan.dropped.push(image.clone()),
            }
        }

        plan
    }

    /// Remove everything `plan` moved out of the queue. Images appended
    /// since the plan was made stay queued.
    pub fn commit(&mut self, plan: &TickPlan<I>) {
        let Some(queue) = self.queue.as_mut() else {
            return;
        };
        let moved: HashSet<&I> = plan.ready.iter().chain(&plan.dropped).collect();
        if !moved.is_empty() {
            queue.retain(|image| !moved.contains(image));
        }
    }
}

impl<I: fmt::Debug> fmt::Debug for VisibilityScheduler<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityScheduler")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_created_on_first_collection() {
        let mut scheduler = VisibilityScheduler::<u32>::new();
        assert!(!scheduler.is_collected());
        assert!(scheduler.needs_collection(false));

        scheduler.merge(Vec::new(), |_| false);
        assert!(scheduler.is_collected());
        assert!(!scheduler.needs_collection(false));
        assert!(scheduler.needs_collection(true));
    }

    #[test]
    fn test_merge_is_additive() {
        let mut scheduler = VisibilityScheduler::new();
        assert_eq!(scheduler.merge(vec![1, 2, 3], |_| false), 3);
        assert_eq!(scheduler.merge(vec![2, 3, 4, 5], |_| false), 2);
        assert_eq!(scheduler.pending(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_merge_drops_duplicate_candidates() {
        let mut scheduler = VisibilityScheduler::new();
        assert_eq!(scheduler.merge(vec![7, 7, 8, 7], |_| false), 2);
        assert_eq!(scheduler.pending(), &[7, 8]);
    }

    #[test]
    fn test_merge_skips_loaded() {
        let mut scheduler = VisibilityScheduler::new();
        scheduler.merge(vec![1, 2, 3, 4], |image| image % 2 == 0);
        assert_eq!(scheduler.pending(), &[1, 3]);
    }

    #[test]
    fn test_plan_all_ready_empties_queue() {
        let mut scheduler = VisibilityScheduler::new();
        scheduler.merge(vec![10, 11, 12, 13, 14], |_| false);

        let plan = scheduler.plan(|_| Decision::Load);
        assert_eq!(plan.ready, vec![10, 11, 12, 13, 14]);
        assert!(plan.pending.is_empty());

        scheduler.commit(&plan);
        assert!(scheduler.is_empty());
        assert!(scheduler.is_collected());
    }

    #[test]
    fn test_plan_keeps_fifo_order() {
        let mut scheduler = VisibilityScheduler::new();
        scheduler.merge(vec![1, 2, 3, 4, 5, 6], |_| false);

        let plan = scheduler.plan(|image| match image % 3 {
            0 => Decision::Drop,
            1 => Decision::Load,
            _ => Decision::Wait,
        });
        assert_eq!(plan.ready, vec![1, 4]);
        assert_eq!(plan.pending, vec![2, 5]);
        assert_eq!(plan.dropped, vec![3, 6]);

        scheduler.commit(&plan);
        assert_eq!(scheduler.pending(), &[2, 5]);
    }

    #[test]
    fn test_commit_large_queue() {
        let mut scheduler = VisibilityScheduler::new();
        scheduler.merge((0..10_000).collect(), |_| false);

        let plan = scheduler.plan(|image| if image % 2 == 0 { Decision::Load } else { Decision::Wait });
        scheduler.commit(&plan);

        assert_eq!(scheduler.len(), 5_000);
        assert!(scheduler.pending().iter().all(|image| image % 2 == 1));
    }

    #[test]
    fn test_commit_keeps_late_arrivals() {
        let mut scheduler = VisibilityScheduler::new();
        scheduler.merge(vec![1, 2], |_| false);

        let plan = scheduler.plan(|_| Decision::Load);
        scheduler.merge(vec![3], |_| false);
        scheduler.commit(&plan);

        assert_eq!(scheduler.pending(), &[3]);
    }

    #[test]
    fn test_waiting_image_loads_on_later_tick() {
        let mut scheduler = VisibilityScheduler::new();
        scheduler.merge(vec![1], |_| false);

        let plan = scheduler.plan(|_| Decision::Wait);
        assert!(plan.is_idle());
        scheduler.commit(&plan);
        assert_eq!(scheduler.len(), 1);

        let plan = scheduler.plan(|_| Decision::Load);
        scheduler.commit(&plan);
        assert!(scheduler.is_empty());
    }
}
