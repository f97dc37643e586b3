//! The runtime owning all CSAPs, send queues and forwarder tasks.
//!
//! Each table sits behind its own mutex. Tests and tools create one runtime per scenario, there
//! is no process-wide state.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::RuntimeConfig;
use crate::csap::{Csap, CsapId};
use crate::du::{ArgsEvaluator, Evaluator};
use crate::forwarder::{Disposition, Task, TaskPolicy};
use crate::nds::Node;
use crate::nic::{Endpoint, FrameWriter};
use crate::sendq::SendQueue;
use crate::{Error, Result};

/// Owner of the CSAP, send queue and forwarder task tables.
pub struct Runtime {
    config: RuntimeConfig,
    evaluator: Option<Arc<dyn Evaluator>>,
    next_id: AtomicU32,
    csaps: Mutex<HashMap<CsapId, Arc<Csap>>>,
    sendqs: Mutex<HashMap<String, Arc<SendQueue>>>,
    tasks: Mutex<HashMap<String, Arc<Task>>>,
}

fn lock<T>(table: &Mutex<T>) -> MutexGuard<T> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Runtime {
    /// Create a runtime with the built-in script evaluator.
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime {
            config,
            evaluator: Some(Arc::new(ArgsEvaluator) as Arc<dyn Evaluator>),
            next_id: AtomicU32::new(1),
            csaps: Mutex::default(),
            sendqs: Mutex::default(),
            tasks: Mutex::default(),
        }
    }

    /// Replace the script evaluator of CSAPs created from now on, `None` disables scripts.
    pub fn with_evaluator(mut self, evaluator: Option<Arc<dyn Evaluator>>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// The configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Create a CSAP from layer descriptions and an endpoint.
    pub fn csap_create(&self, descs: &[Node], endpoint: Box<dyn Endpoint>) -> Result<CsapId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let csap = Csap::new(id, descs, endpoint, self.evaluator.clone(), self.config.clone())?;
        lock(&self.csaps).insert(id, Arc::new(csap));
        Ok(id)
    }

    /// Look up a CSAP.
    pub fn csap(&self, id: CsapId) -> Result<Arc<Csap>> {
        lock(&self.csaps).get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("csap {}", id)))
    }

    /// Destroy a CSAP, stopping its receive operation.
    ///
    /// Handles obtained earlier keep it alive until they are dropped. A failed CSAP is destroyed
    /// all the same.
    pub fn csap_destroy(&self, id: CsapId) -> Result<()> {
        let csap = lock(&self.csaps).remove(&id)
            .ok_or_else(|| Error::NotFound(format!("csap {}", id)))?;
        if let Err(err) = csap.stop() {
            tracing::debug!(csap = id, %err, "destroying a failed CSAP");
        }
        Ok(())
    }

    /// Create a send queue writing to `writer`.
    ///
    /// A `bandwidth` of zero does not limit the rate, otherwise it is in bytes per second.
    pub fn sendq_create(&self, name: &str, writer: Box<dyn FrameWriter>, bandwidth: u64)
        -> Result<Arc<SendQueue>>
    {
        let mut sendqs = lock(&self.sendqs);
        if sendqs.contains_key(name) {
            return Err(Error::invalid(format!("send queue `{}` exists", name)));
        }
        let sendq = Arc::new(SendQueue::new(name, writer, self.config.sendq_max_size, bandwidth)?);
        sendqs.insert(name.to_owned(), Arc::clone(&sendq));
        Ok(sendq)
    }

    /// Look up a send queue.
    pub fn sendq(&self, name: &str) -> Result<Arc<SendQueue>> {
        lock(&self.sendqs).get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("send queue `{}`", name)))
    }

    /// Destroy a send queue that no task uses.
    ///
    /// The queue stops once the last handle to it is dropped.
    pub fn sendq_destroy(&self, name: &str) -> Result<()> {
        // Tasks before send queues, as in `task_add`.
        let tasks = lock(&self.tasks);
        if tasks.values().any(|task| task.sendq().name() == name) {
            return Err(Error::invalid(format!("send queue `{}` is used by a task", name)));
        }
        lock(&self.sendqs).remove(name)
            .map(drop)
            .ok_or_else(|| Error::NotFound(format!("send queue `{}`", name)))
    }

    /// Add a forwarder task feeding the named send queue.
    pub fn task_add(&self, name: &str, policy: TaskPolicy, sendq: &str) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        let sendq = self.sendq(sendq)?;
        if tasks.contains_key(name) {
            return Err(Error::invalid(format!("task `{}` exists", name)));
        }
        let task = Task::new(name, policy, sendq, self.config.forwarder_seed)?;
        tracing::debug!(task = name, sendq = task.sendq().name(), "task added");
        tasks.insert(name.to_owned(), Arc::new(task));
        Ok(())
    }

    /// Remove a forwarder task.
    pub fn task_del(&self, name: &str) -> Result<()> {
        lock(&self.tasks).remove(name)
            .map(drop)
            .ok_or_else(|| Error::NotFound(format!("task `{}`", name)))
    }

    /// Look up a forwarder task.
    pub fn task(&self, name: &str) -> Result<Arc<Task>> {
        lock(&self.tasks).get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task `{}`", name)))
    }

    /// Pass a packet through the named task.
    pub fn process_packet(&self, task: &str, frame: &[u8]) -> Result<Disposition> {
        // Processing runs unlocked so that tasks do not serialize on the table.
        self.task(task)?.process(frame)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Tasks hold their queues, queues may hold CSAP writers.
        lock(&self.tasks).clear();
        lock(&self.sendqs).clear();
        lock(&self.csaps).clear();
    }
}
