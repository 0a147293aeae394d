// functions/src/queue/memory.rs

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use super::{Delivery, MessageSource, QueueError};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Bytes>,
    acked: usize,
    nacked: usize,
    renewed: usize,
    closed: bool,
}

/// In-process queue with at-least-once semantics: a nacked message goes
/// back to the front of the queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, data: impl Into<Bytes>) {
        self.state.lock().await.ready.push_back(data.into());
    }

    /// Make further receives fail, as a broken connection would.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn acked(&self) -> usize {
        self.state.lock().await.acked
    }

    pub async fn nacked(&self) -> usize {
        self.state.lock().await.nacked
    }

    pub async fn renewed(&self) -> usize {
        self.state.lock().await.renewed
    }
}

#[derive(Debug)]
pub struct MemoryDelivery {
    data: Bytes,
    state: Arc<Mutex<QueueState>>,
}

impl MessageSource for MemoryQueue {
    type Delivery = MemoryDelivery;

    async fn receive(&self) -> Result<Option<MemoryDelivery>, QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        Ok(state.ready.pop_front().map(|data| MemoryDelivery {
            data,
            state: self.state.clone(),
        }))
    }
}

impl Delivery for MemoryDelivery {
    fn data(&self) -> &[u8] {
        &self.data
    }

    async fn ack(self) -> Result<(), QueueError> {
        self.state.lock().await.acked += 1;
        Ok(())
    }

    async fn nack(self) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.nacked += 1;
        state.ready.push_front(self.data);
        Ok(())
    }

    async fn renew(&self) -> Result<(), QueueError> {
        self.state.lock().await.renewed += 1;
        Ok(())
    }
}
