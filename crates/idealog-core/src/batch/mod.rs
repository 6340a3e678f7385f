//! Batch coalescer
//!
//! Collects record writes issued in quick succession and applies them as one
//! storage transaction. The collection window opens with the first queued
//! operation and is not extended by later ones; every operation in a flush is
//! applied in submission order, and every waiter receives its own result.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::models::{Collection, LocalId, OwnerId, RecordPatch};

/// A single queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Update {
        collection: Collection,
        local_id: LocalId,
        owner: OwnerId,
        patch: RecordPatch,
    },
    SoftDelete {
        collection: Collection,
        local_id: LocalId,
        owner: OwnerId,
    },
    HardDelete {
        collection: Collection,
        local_id: LocalId,
        owner: OwnerId,
    },
}

impl BatchOp {
    /// Owner whose data the operation touches
    pub const fn owner(&self) -> &OwnerId {
        match self {
            Self::Update { owner, .. }
            | Self::SoftDelete { owner, .. }
            | Self::HardDelete { owner, .. } => owner,
        }
    }

    /// Reject an update whose fields could never be stored.
    ///
    /// Checked before queuing, so an invalid write cannot roll back the
    /// unrelated writes it would otherwise share a batch with.
    pub fn validate(&self) -> Result<()> {
        let Self::Update {
            collection,
            patch: RecordPatch {
                fields: Some(fields),
                ..
            },
            ..
        } = self
        else {
            return Ok(());
        };
        if fields.collection() != *collection {
            return Err(Error::Validation(format!(
                "{} fields cannot be stored in {collection}",
                fields.collection().singular()
            )));
        }
        fields.validate()
    }
}

/// Destination of flushed batches.
pub trait BatchSink: Send + Sync + 'static {
    /// Apply `ops` atomically, returning for each whether a record matched.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> impl Future<Output = Result<Vec<bool>>> + Send;
}

struct Queued {
    op: BatchOp,
    reply: oneshot::Sender<Result<bool>>,
}

/// Handle to the background coalescing task.
pub struct BatchCoalescer {
    sender: mpsc::UnboundedSender<Queued>,
    task: JoinHandle<()>,
}

impl BatchCoalescer {
    /// Start coalescing writes into `sink`. Must be called inside a tokio runtime.
    pub fn spawn<S: BatchSink>(sink: S, window: Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(sink, receiver, window));
        Self { sender, task }
    }

    fn enqueue(&self, op: BatchOp) -> Result<oneshot::Receiver<Result<bool>>> {
        op.validate()?;
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(Queued { op, reply })
            .map_err(|_| Error::Shutdown)?;
        Ok(receiver)
    }

    /// Queue one write and wait for its batch to be applied.
    ///
    /// Resolves to `false` when no record matched the operation.
    pub async fn submit(&self, op: BatchOp) -> Result<bool> {
        let receiver = self.enqueue(op)?;
        receiver.await.map_err(|_| Error::Shutdown)?
    }

    /// Queue several writes back to back and wait for all of them.
    ///
    /// Nothing is queued unless every write is valid.
    pub async fn submit_all(&self, ops: Vec<BatchOp>) -> Result<Vec<bool>> {
        ops.iter().try_for_each(BatchOp::validate)?;
        let receivers = ops
            .into_iter()
            .map(|op| self.enqueue(op))
            .collect::<Result<Vec<_>>>()?;

        let mut results = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            results.push(receiver.await.map_err(|_| Error::Shutdown)??);
        }
        Ok(results)
    }

    /// Flush everything still queued, then stop the task.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(error) = self.task.await {
            tracing::warn!("Batch coalescer ended abnormally: {error}");
        }
    }
}

async fn run<S: BatchSink>(sink: S, mut receiver: mpsc::UnboundedReceiver<Queued>, window: Duration) {
    while let Some(first) = receiver.recv().await {
        let deadline = Instant::now() + window;
        let mut queued = vec![first];
        let mut closed = false;

        loop {
            tokio::select! {
                biased;
                next = receiver.recv() => match next {
                    Some(item) => queued.push(item),
                    None => {
                        closed = true;
                        break;
                    }
                },
                () = tokio::time::sleep_until(deadline) => break,
            }
        }

        flush(&sink, queued).await;
        if closed {
            break;
        }
    }
}

async fn flush<S: BatchSink>(sink: &S, queued: Vec<Queued>) {
    let (ops, replies): (Vec<_>, Vec<_>) = queued
        .into_iter()
        .map(|item| (item.op, item.reply))
        .unzip();
    let size = ops.len();

    match sink.apply_batch(ops).await {
        Ok(matched) => {
            tracing::debug!("Flushed batch of {size} write(s)");
            for (reply, matched) in replies.into_iter().zip(matched) {
                let _ = reply.send(Ok(matched));
            }
        }
        Err(error) => {
            let message = error.to_string();
            tracing::warn!("Batch of {size} write(s) rolled back: {message}");
            for reply in replies {
                let _ = reply.send(Err(Error::Database(message.clone())));
            }
        }
    }
}
