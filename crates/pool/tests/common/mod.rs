//! Shared test fixtures for pool integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use courier_pool::{CourierError, CourierResult, TransportAllocator};

/// In-memory transport handle with a controllable health flag.
pub struct MockTransport {
    pub id: u64,
    pub healthy: Arc<AtomicBool>,
}

impl MockTransport {
    /// Make subsequent validation of this transport fail.
    pub fn poison(&self) {
        self.healthy.store(false, Ordering::Release);
    }
}

/// Configurable in-memory allocator keyed by `String` descriptors.
pub struct MockAllocator {
    next_id: AtomicU64,
    allocated: AtomicU64,
    deallocated: AtomicU64,
    fail_all: AtomicBool,
    fail_endpoints: Mutex<HashSet<String>>,
}

impl MockAllocator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            deallocated: AtomicU64::new(0),
            fail_all: AtomicBool::new(false),
            fail_endpoints: Mutex::new(HashSet::new()),
        }
    }

    /// Transports allocated so far.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Transports destroyed so far.
    pub fn deallocated(&self) -> u64 {
        self.deallocated.load(Ordering::Acquire)
    }

    /// Make every allocation fail until called again with `false`.
    pub fn fail_allocations(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Release);
    }

    /// Make allocations for one endpoint fail.
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.fail_endpoints
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }
}

#[async_trait]
impl TransportAllocator for MockAllocator {
    type Descriptor = String;
    type Transport = MockTransport;

    async fn allocate(&self, descriptor: &String) -> CourierResult<MockTransport> {
        let refused = self.fail_all.load(Ordering::Acquire)
            || self.fail_endpoints.lock().unwrap().contains(descriptor);
        if refused {
            return Err(CourierError::allocation(
                descriptor.clone(),
                "mock allocator refused",
            ));
        }
        self.allocated.fetch_add(1, Ordering::AcqRel);
        Ok(MockTransport {
            id: self.next_id.fetch_add(1, Ordering::AcqRel),
            healthy: Arc::new(AtomicBool::new(true)),
        })
    }

    async fn validate(&self, transport: &mut MockTransport) -> bool {
        transport.healthy.load(Ordering::Acquire)
    }

    async fn deallocate(&self, _transport: MockTransport) {
        self.deallocated.fetch_add(1, Ordering::AcqRel);
    }
}
