//! Single-writer allocator service
//!
//! One worker thread owns the [`GpuResourceAllocator`] and drains a command
//! channel; async callers talk to it through a cloneable [`AllocatorHandle`].
//! Within the process every operation is therefore applied one at a time, in
//! arrival order. The store lock extends that guarantee to other processes.

use gpuhub_core::{AllocationTable, GpuhubError, GpuhubResult, HostStatus, Placement};
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::allocator::GpuResourceAllocator;

const COMMAND_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<GpuhubResult<T>>;

enum Command {
    GetOrAssign {
        requester: String,
        count: u32,
        reply: Reply<Placement>,
    },
    Release {
        requester: String,
        reply: Reply<bool>,
    },
    PlacementOf {
        requester: String,
        reply: Reply<Option<Placement>>,
    },
    Allocations {
        reply: Reply<AllocationTable>,
    },
    Hosts {
        reply: Reply<Vec<HostStatus>>,
    },
    DriverVersion {
        host: String,
        reply: Reply<Option<String>>,
    },
}

/// Owner of the allocator, running on a dedicated thread
pub struct AllocatorService {
    allocator: GpuResourceAllocator,
    rx: mpsc::Receiver<Command>,
}

impl AllocatorService {
    /// Start the service and return a handle to it
    ///
    /// The service stops once every handle has been dropped.
    pub fn spawn(allocator: GpuResourceAllocator) -> GpuhubResult<AllocatorHandle> {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let service = Self { allocator, rx };

        std::thread::Builder::new()
            .name("gpuhub-allocator".to_string())
            .spawn(move || service.run())?;

        Ok(AllocatorHandle { tx })
    }

    fn run(mut self) {
        info!(
            strategy = self.allocator.strategy_name(),
            "Allocator service started"
        );

        while let Some(command) = self.rx.blocking_recv() {
            // The allocator holds no state between commands, so a panicking
            // command only loses its own reply.
            if let Err(cause) = panic::catch_unwind(AssertUnwindSafe(|| self.handle(command))) {
                error!(cause = panic_message(&*cause), "Allocator command panicked");
            }
        }

        info!("Allocator service stopped");
    }

    fn handle(&self, command: Command) {
        // A dropped receiver means the caller gave up waiting; the operation
        // itself has already completed or failed atomically.
        match command {
            Command::GetOrAssign {
                requester,
                count,
                reply,
            } => {
                let _ = reply.send(self.allocator.get_or_assign(&requester, count));
            }
            Command::Release { requester, reply } => {
                let _ = reply.send(self.allocator.release(&requester));
            }
            Command::PlacementOf { requester, reply } => {
                let _ = reply.send(self.allocator.placement_of(&requester));
            }
            Command::Allocations { reply } => {
                let _ = reply.send(self.allocator.allocations());
            }
            Command::Hosts { reply } => {
                let _ = reply.send(self.allocator.hosts());
            }
            Command::DriverVersion { host, reply } => {
                let _ = reply.send(self.allocator.driver_version(&host));
            }
        }
    }
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Cloneable async front-end to the allocator service
#[derive(Clone)]
pub struct AllocatorHandle {
    tx: mpsc::Sender<Command>,
}

impl AllocatorHandle {
    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<GpuhubResult<T>>,
    ) -> GpuhubResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| GpuhubError::Internal("allocator service is not running".to_string()))?;

        rx.await.map_err(|_| {
            GpuhubError::Internal("allocator service dropped the request".to_string())
        })?
    }

    /// Return the requester's placement, assigning one if it has none
    pub async fn get_or_assign(&self, requester: &str, count: u32) -> GpuhubResult<Placement> {
        debug!(requester = requester, requested = count, "Queueing get-or-assign");
        let (reply, rx) = oneshot::channel();
        let command = Command::GetOrAssign {
            requester: requester.to_string(),
            count,
            reply,
        };
        self.request(command, rx).await
    }

    /// Release every slot held by the requester
    pub async fn release(&self, requester: &str) -> GpuhubResult<bool> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Release {
            requester: requester.to_string(),
            reply,
        };
        self.request(command, rx).await
    }

    /// Current placement of a requester
    pub async fn placement_of(&self, requester: &str) -> GpuhubResult<Option<Placement>> {
        let (reply, rx) = oneshot::channel();
        let command = Command::PlacementOf {
            requester: requester.to_string(),
            reply,
        };
        self.request(command, rx).await
    }

    /// Snapshot of the allocation table
    pub async fn allocations(&self) -> GpuhubResult<AllocationTable> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Allocations { reply }, rx).await
    }

    /// Occupancy of every catalog host
    pub async fn hosts(&self) -> GpuhubResult<Vec<HostStatus>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Hosts { reply }, rx).await
    }

    /// Driver version declared for a host
    pub async fn driver_version(&self, host: &str) -> GpuhubResult<Option<String>> {
        let (reply, rx) = oneshot::channel();
        let command = Command::DriverVersion {
            host: host.to_string(),
            reply,
        };
        self.request(command, rx).await
    }
}
