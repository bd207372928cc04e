//! Per-handle write buffering.
//!
//! A strategy is picked when the handle opens and stays fixed. Nothing but
//! the `None` strategy's per-write uploads is visible remotely before
//! [`WriteBuffer::finish`] returns.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::api::{ContentUpload, NodeStore};
use crate::config::WriteBufferKind;
use crate::error::{DriveError, Result};
use crate::fs::Node;

/// Strategy and sizes a write handle was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteSettings {
    pub kind: WriteBufferKind,
    pub buffer_size: usize,
    pub queue_depth: usize,
}

pub(crate) enum WriteBuffer {
    None(DirectWriter),
    Simple(SimpleBuffer),
    Async(AsyncBuffer),
    BoundedQueue(QueueWriter),
}

impl WriteBuffer {
    pub(crate) fn new(settings: WriteSettings, store: Arc<dyn NodeStore>, node_id: String) -> Self {
        let buffer_size = settings.buffer_size.max(1);
        match settings.kind {
            WriteBufferKind::None => WriteBuffer::None(DirectWriter {
                store,
                node_id,
                content: Vec::new(),
                last: None,
            }),
            WriteBufferKind::Simple => WriteBuffer::Simple(SimpleBuffer {
                store,
                node_id,
                buffer: Vec::new(),
                capacity: buffer_size,
                upload: None,
                written: 0,
            }),
            WriteBufferKind::Async => WriteBuffer::Async(AsyncBuffer {
                store,
                node_id,
                buffer: Vec::new(),
                capacity: buffer_size,
                slot: UploadSlot::Idle(None),
                written: 0,
            }),
            WriteBufferKind::BoundedQueue => WriteBuffer::BoundedQueue(QueueWriter {
                store,
                node_id,
                depth: settings.queue_depth.max(1),
                state: None,
                written: 0,
            }),
        }
    }

    /// Bytes accepted so far.
    pub(crate) fn written(&self) -> u64 {
        match self {
            WriteBuffer::None(w) => w.content.len() as u64,
            WriteBuffer::Simple(w) => w.written,
            WriteBuffer::Async(w) => w.written,
            WriteBuffer::BoundedQueue(w) => w.written,
        }
    }

    pub(crate) async fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match self {
            WriteBuffer::None(w) => w.write(data).await,
            WriteBuffer::Simple(w) => w.write(data).await,
            WriteBuffer::Async(w) => w.write(data).await,
            WriteBuffer::BoundedQueue(w) => w.write(data).await,
        }
    }

    /// Push out everything still buffered and commit it.
    ///
    /// Returns `None` when nothing was ever written, in which case remote
    /// content is left as it was.
    pub(crate) async fn finish(self) -> Result<Option<Node>> {
        match self {
            WriteBuffer::None(w) => Ok(w.last),
            WriteBuffer::Simple(w) => w.finish().await,
            WriteBuffer::Async(w) => w.finish().await,
            WriteBuffer::BoundedQueue(w) => w.finish().await,
        }
    }
}

fn join_error(err: JoinError) -> DriveError {
    DriveError::Custom(format!("upload task failed: {}", err))
}

/// Commit the tail of a buffered session.
async fn commit(
    store: &Arc<dyn NodeStore>,
    node_id: &str,
    upload: Option<Box<dyn ContentUpload>>,
    tail: Vec<u8>,
    written: u64,
) -> Result<Option<Node>> {
    match upload {
        // Never filled a buffer: one plain upload is enough.
        None if written == 0 => Ok(None),
        None => Ok(Some(store.write_content(node_id, Bytes::from(tail)).await?)),
        Some(mut upload) => {
            if !tail.is_empty() {
                upload.append(Bytes::from(tail)).await?;
            }
            Ok(Some(upload.finish().await?))
        }
    }
}

/// Copy as much of `data` as fits; returns the unconsumed rest.
fn fill<'a>(buffer: &mut Vec<u8>, capacity: usize, data: &'a [u8]) -> &'a [u8] {
    let take = (capacity - buffer.len()).min(data.len());
    buffer.extend_from_slice(&data[..take]);
    &data[take..]
}

pub(crate) struct DirectWriter {
    store: Arc<dyn NodeStore>,
    node_id: String,
    content: Vec<u8>,
    last: Option<Node>,
}

impl DirectWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.content.extend_from_slice(data);
        let node = self
            .store
            .write_content(&self.node_id, Bytes::copy_from_slice(&self.content))
            .await?;
        self.last = Some(node);
        Ok(())
    }
}

pub(crate) struct SimpleBuffer {
    store: Arc<dyn NodeStore>,
    node_id: String,
    buffer: Vec<u8>,
    capacity: usize,
    upload: Option<Box<dyn ContentUpload>>,
    written: u64,
}

impl SimpleBuffer {
    async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let rest = fill(&mut self.buffer, self.capacity, data);
            self.written += (data.len() - rest.len()) as u64;
            data = rest;
            if self.buffer.len() == self.capacity {
                self.flush().await?;
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let chunk = Bytes::from(std::mem::take(&mut self.buffer));
        let mut upload = match self.upload.take() {
            Some(upload) => upload,
            None => self.store.begin_upload(&self.node_id).await?,
        };
        upload.append(chunk).await?;
        self.upload = Some(upload);
        Ok(())
    }

    async fn finish(self) -> Result<Option<Node>> {
        commit(
            &self.store,
            &self.node_id,
            self.upload,
            self.buffer,
            self.written,
        )
        .await
    }
}

enum UploadSlot {
    Idle(Option<Box<dyn ContentUpload>>),
    InFlight(JoinHandle<Result<Box<dyn ContentUpload>>>),
}

pub(crate) struct AsyncBuffer {
    store: Arc<dyn NodeStore>,
    node_id: String,
    buffer: Vec<u8>,
    capacity: usize,
    slot: UploadSlot,
    written: u64,
}

impl AsyncBuffer {
    async fn write(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let rest = fill(&mut self.buffer, self.capacity, data);
            self.written += (data.len() - rest.len()) as u64;
            data = rest;
            if self.buffer.len() == self.capacity {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// Wait for the in-flight upload, if any, and take the session back.
    async fn reclaim(&mut self) -> Result<Option<Box<dyn ContentUpload>>> {
        match std::mem::replace(&mut self.slot, UploadSlot::Idle(None)) {
            UploadSlot::Idle(upload) => Ok(upload),
            UploadSlot::InFlight(task) => task.await.map_err(join_error)?.map(Some),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let chunk = Bytes::from(std::mem::take(&mut self.buffer));
        let mut upload = match self.reclaim().await? {
            Some(upload) => upload,
            None => self.store.begin_upload(&self.node_id).await?,
        };
        self.slot = UploadSlot::InFlight(tokio::spawn(async move {
            upload.append(chunk).await?;
            Ok::<_, DriveError>(upload)
        }));
        Ok(())
    }

    async fn finish(mut self) -> Result<Option<Node>> {
        let upload = self.reclaim().await?;
        let tail = std::mem::take(&mut self.buffer);
        commit(&self.store, &self.node_id, upload, tail, self.written).await
    }
}

struct QueueState {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<Result<Node>>,
}

pub(crate) struct QueueWriter {
    store: Arc<dyn NodeStore>,
    node_id: String,
    depth: usize,
    state: Option<QueueState>,
    written: u64,
}

impl QueueWriter {
    fn start(&self) -> QueueState {
        let (tx, rx) = mpsc::channel::<Bytes>(self.depth);
        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, DriveError>(chunk), rx))
        })
        .boxed();

        let store = Arc::clone(&self.store);
        let node_id = self.node_id.clone();
        let task = tokio::spawn(async move { store.upload_stream(&node_id, body).await });
        QueueState { tx, task }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.state.is_none() {
            self.state = Some(self.start());
        }
        let Some(state) = self.state.as_ref() else {
            return Err(DriveError::InvalidResponse);
        };

        if state.tx.send(Bytes::copy_from_slice(data)).await.is_err() {
            // The uploader hung up early; surface its error.
            let state = self.state.take();
            return match state {
                Some(QueueState { tx, task }) => {
                    drop(tx);
                    match task.await.map_err(join_error)? {
                        Err(err) => Err(err),
                        Ok(_) => Err(DriveError::Custom(
                            "upload finished before end of input".to_string(),
                        )),
                    }
                }
                None => Err(DriveError::InvalidResponse),
            };
        }
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self) -> Result<Option<Node>> {
        match self.state.take() {
            None => Ok(None),
            Some(QueueState { tx, task }) => {
                drop(tx);
                let node = task.await.map_err(join_error)??;
                Ok(Some(node))
            }
        }
    }
}

impl Drop for QueueWriter {
    fn drop(&mut self) {
        // Abort before the sender closes so a dropped handle never commits
        // a truncated stream.
        if let Some(state) = &self.state {
            state.task.abort();
        }
    }
}
