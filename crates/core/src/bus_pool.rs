//! Long-lived audio buses shared across sessions.
//!
//! Buses outlive a single connection; each session takes a [`BusLease`] and
//! drops it on teardown. A bus found closed on acquisition is replaced.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::{AudioBus, BusFactory, BusRole, BusState};
use crate::error::{Result, VoiceError};

/// One outstanding lease on a pooled bus; the count follows clones and drops.
struct LeaseCount(Arc<AtomicUsize>);

impl LeaseCount {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Clone for LeaseCount {
    fn clone(&self) -> Self {
        Self::new(&self.0)
    }
}

impl Drop for LeaseCount {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Clone)]
pub struct BusLease {
    role: BusRole,
    bus: Arc<dyn AudioBus>,
    _count: LeaseCount,
}

impl BusLease {
    pub fn role(&self) -> BusRole {
        self.role
    }
}

impl Deref for BusLease {
    type Target = dyn AudioBus;

    fn deref(&self) -> &Self::Target {
        self.bus.as_ref()
    }
}

struct Slot {
    bus: Arc<dyn AudioBus>,
    leases: Arc<AtomicUsize>,
}

impl Slot {
    fn lease(&self, role: BusRole) -> BusLease {
        BusLease {
            role,
            bus: self.bus.clone(),
            _count: LeaseCount::new(&self.leases),
        }
    }
}

pub struct BusPool {
    factory: Arc<dyn BusFactory>,
    slots: Mutex<HashMap<BusRole, Slot>>,
}

impl BusPool {
    pub fn new(factory: Arc<dyn BusFactory>) -> Self {
        Self {
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn acquire(&self, role: BusRole) -> Result<BusLease> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| VoiceError::Audio("bus pool lock poisoned".to_string()))?;

        if let Some(slot) = slots.get(&role) {
            if slot.bus.state() != BusState::Closed {
                return Ok(slot.lease(role));
            }
            tracing::info!("{:?} bus was closed, creating a new one", role);
        }

        let slot = Slot {
            bus: self.factory.create(role)?,
            leases: Arc::new(AtomicUsize::new(0)),
        };
        let lease = slot.lease(role);
        slots.insert(role, slot);
        Ok(lease)
    }

    /// Leases of the current `role` bus that have not been dropped yet.
    pub fn live_leases(&self, role: BusRole) -> usize {
        self.slots
            .lock()
            .ok()
            .and_then(|slots| slots.get(&role).map(|slot| slot.leases.load(Ordering::Acquire)))
            .unwrap_or(0)
    }

    /// Closes every pooled bus. Later acquisitions create fresh ones.
    pub fn shutdown(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            for (role, slot) in slots.drain() {
                tracing::debug!("closing {:?} bus", role);
                slot.bus.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::SoftwareBus;

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl BusFactory for CountingFactory {
        fn create(&self, _role: BusRole) -> Result<Arc<dyn AudioBus>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SoftwareBus::new(24_000)))
        }
    }

    #[test]
    fn reuses_open_bus_and_counts_leases() {
        let factory = Arc::new(CountingFactory::default());
        let pool = BusPool::new(factory.clone());

        let a = pool.acquire(BusRole::Output).unwrap();
        let b = pool.acquire(BusRole::Output).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(pool.live_leases(BusRole::Output), 2);

        let c = a.clone();
        assert_eq!(pool.live_leases(BusRole::Output), 3);

        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.live_leases(BusRole::Output), 0);
        assert_eq!(pool.live_leases(BusRole::Input), 0);
    }

    #[test]
    fn replaces_closed_bus() {
        let factory = Arc::new(CountingFactory::default());
        let pool = BusPool::new(factory.clone());

        let lease = pool.acquire(BusRole::Input).unwrap();
        lease.close();
        drop(lease);

        let lease = pool.acquire(BusRole::Input).unwrap();
        assert_eq!(lease.state(), BusState::Running);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn leases_ignore_other_owners_of_the_bus() {
        struct SharedFactory(Arc<SoftwareBus>);

        impl BusFactory for SharedFactory {
            fn create(&self, _role: BusRole) -> Result<Arc<dyn AudioBus>> {
                Ok(self.0.clone())
            }
        }

        let bus = Arc::new(SoftwareBus::new(24_000));
        let pool = BusPool::new(Arc::new(SharedFactory(bus.clone())));
        let lease = pool.acquire(BusRole::Output).unwrap();
        assert_eq!(pool.live_leases(BusRole::Output), 1);

        drop(lease);
        assert_eq!(pool.live_leases(BusRole::Output), 0);
        assert_eq!(Arc::strong_count(&bus), 3);
    }
}
