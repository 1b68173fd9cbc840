//! Reverse-order deferred destruction of GPU objects.
//!
//! A [`DeletionQueue`] records everything its owner created and tears it all
//! down in the opposite order when flushed. Later objects often reference
//! earlier ones (a view references its image, a descriptor set references a
//! buffer), so last-in-first-out destruction never frees a referenced object
//! before its referrer.
//!
//! Entries hold resources by value. Arbitrary cleanup that is not a plain
//! resource can be queued as an action that receives the device at flush
//! time, so nothing in the queue points back into its owner.

use crate::device::GpuDevice;
use crate::error::Result;
use crate::resource::GpuResource;

type Action<D> = Box<dyn FnOnce(&D) -> Result<()>>;

enum Entry<D> {
    Resource(GpuResource),
    Action(Action<D>),
}

/// LIFO cleanup registry for one owner (the engine or a single frame slot).
pub struct DeletionQueue<D> {
    entries: Vec<Entry<D>>,
    flushes: u64,
}

impl<D: GpuDevice> DeletionQueue<D> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            flushes: 0,
        }
    }

    /// Queue a resource for destruction.
    pub fn push_resource(&mut self, resource: impl Into<GpuResource>) {
        self.entries.push(Entry::Resource(resource.into()));
    }

    /// Queue an arbitrary cleanup action.
    pub fn push<F>(&mut self, action: F)
    where
        F: FnOnce(&D) -> Result<()> + 'static,
    {
        self.entries.push(Entry::Action(Box::new(action)));
    }

    /// Run every queued entry, newest first.
    ///
    /// Entries are popped one at a time; if one fails, the error is returned
    /// and the older entries stay queued for a later flush.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn flush(&mut self, device: &D) -> Result<()> {
        let pending = self.entries.len();
        while let Some(entry) = self.entries.pop() {
            match entry {
                Entry::Resource(resource) => {
                    tracing::trace!("Destroying {}", resource.kind_name());
                    device.destroy(resource)?;
                }
                Entry::Action(action) => action(device)?,
            }
        }
        if pending > 0 {
            tracing::trace!("Flushed {pending} deletion entries");
        }
        self.flushes += 1;
        Ok(())
    }

    /// Build a value out of several device objects, registering each one in
    /// the given queue as soon as it exists.
    ///
    /// If `build` fails, everything registered so far is destroyed newest
    /// first and the error is returned. On success the entries are dropped
    /// without running, since the returned value now owns the objects.
    pub fn build_or_unwind<T, F>(device: &D, build: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mut created = Self::new();
        match build(&mut created) {
            Ok(value) => {
                created.entries.clear();
                Ok(value)
            }
            Err(e) => {
                created.unwind(device);
                Err(e)
            }
        }
    }

    /// Flush everything after a failed construction.
    ///
    /// Unlike [`DeletionQueue::flush`] this does not stop at a failing entry:
    /// each failure is logged and the remaining entries still run, so the
    /// caller can return its original error.
    pub fn unwind(&mut self, device: &D) {
        while let Err(e) = self.flush(device) {
            tracing::error!("Failed to release partially created object: {e}");
        }
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of completed flushes.
    pub const fn flush_count(&self) -> u64 {
        self.flushes
    }
}

impl<D: GpuDevice> Default for DeletionQueue<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Drop for DeletionQueue<D> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                "Deletion queue dropped with {} unflushed entries",
                self.entries.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use crate::GpuError;
    use ash::vk;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn logging_queue(count: usize) -> (DeletionQueue<MockDevice>, Rc<RefCell<Vec<usize>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for i in 0..count {
            let log = Rc::clone(&log);
            queue.push(move |_: &MockDevice| {
                log.borrow_mut().push(i);
                Ok(())
            });
        }
        (queue, log)
    }

    #[test]
    fn flush_runs_actions_in_reverse_order() {
        let device = MockDevice::new();
        let (mut queue, log) = logging_queue(5);

        queue.flush(&device).unwrap();

        assert_eq!(*log.borrow(), vec![4, 3, 2, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn second_flush_is_a_no_op() {
        let device = MockDevice::new();
        let (mut queue, log) = logging_queue(3);

        queue.flush(&device).unwrap();
        queue.flush(&device).unwrap();

        assert_eq!(log.borrow().len(), 3);
        assert_eq!(queue.flush_count(), 2);
    }

    #[test]
    fn flushing_empty_queue_succeeds() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::<MockDevice>::new();
        queue.flush(&device).unwrap();
        assert_eq!(queue.flush_count(), 1);
    }

    #[test]
    fn resources_are_destroyed_newest_first() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        let first = device.create_fence(true).unwrap();
        let second = device.create_semaphore().unwrap();
        queue.push_resource(GpuResource::Fence(first));
        queue.push_resource(GpuResource::Semaphore(second));

        queue.flush(&device).unwrap();

        let destroyed = device.destroyed();
        assert_eq!(destroyed, vec!["semaphore", "fence"]);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn failing_entry_keeps_older_entries_queued() {
        let device = MockDevice::new();
        let (mut queue, log) = logging_queue(2);
        queue.push(|_: &MockDevice| Err(GpuError::Other("boom".into())));

        assert!(queue.flush(&device).is_err());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.flush_count(), 0);

        queue.flush(&device).unwrap();
        assert_eq!(*log.borrow(), vec![1, 0]);
    }

    #[test]
    fn actions_and_resources_interleave() {
        let device = MockDevice::new();
        let mut queue = DeletionQueue::new();
        let sampler = device.create_sampler(vk::Filter::LINEAR).unwrap();
        queue.push_resource(sampler);
        let seen = Rc::new(RefCell::new(0usize));
        let seen_in_action = Rc::clone(&seen);
        queue.push(move |device: &MockDevice| {
            *seen_in_action.borrow_mut() = device.live_count();
            Ok(())
        });

        queue.flush(&device).unwrap();

        // The action ran while the sampler was still alive.
        assert_eq!(*seen.borrow(), 1);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn unwind_runs_past_failing_entries() {
        let device = MockDevice::new();
        let (mut queue, log) = logging_queue(2);
        queue.push(|_: &MockDevice| Err(GpuError::Other("boom".into())));

        queue.unwind(&device);

        assert!(queue.is_empty());
        assert_eq!(*log.borrow(), vec![1, 0]);
    }

    #[test]
    fn failed_build_destroys_what_it_created() {
        let device = MockDevice::new();

        let result: Result<()> = DeletionQueue::build_or_unwind(&device, |created| {
            created.push_resource(GpuResource::Fence(device.create_fence(true)?));
            created.push_resource(GpuResource::Semaphore(device.create_semaphore()?));
            Err(GpuError::Other("third object failed".into()))
        });

        assert!(result.is_err());
        assert_eq!(device.destroyed(), vec!["semaphore", "fence"]);
        assert_eq!(device.live_count(), 0);
    }

    #[test]
    fn successful_build_keeps_its_objects() {
        let device = MockDevice::new();

        let fence = DeletionQueue::build_or_unwind(&device, |created| {
            let fence = device.create_fence(true)?;
            created.push_resource(GpuResource::Fence(fence));
            Ok(fence)
        })
        .unwrap();

        assert_eq!(device.live_count(), 1);
        device.destroy(GpuResource::Fence(fence)).unwrap();
    }
}
