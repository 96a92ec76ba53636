use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use super::{RecordUpdate, RoomRecord, RoomStore, StoreError};
use crate::room::RoomId;

enum MirrorJob {
    Create(RoomRecord),
    Update(RoomId, RecordUpdate),
    Close(RoomId, DateTime<Utc>),
    Flush(oneshot::Sender<()>),
}

impl MirrorJob {
    fn describe(&self) -> String {
        match self {
            MirrorJob::Create(record) => format!("create {}", record.room_id),
            MirrorJob::Update(room_id, _) => format!("update {}", room_id),
            MirrorJob::Close(room_id, _) => format!("close {}", room_id),
            MirrorJob::Flush(_) => "flush".to_string(),
        }
    }
}

/// Fire-and-forget writer in front of a [`RoomStore`].
///
/// Jobs run one at a time on a background task in the order they were
/// queued, so a newer snapshot of a room always lands after an older one.
/// Failures are logged and dropped.
#[derive(Clone)]
pub struct StoreMirror {
    jobs: mpsc::UnboundedSender<MirrorJob>,
    store: Arc<dyn RoomStore>,
}

impl StoreMirror {
    /// Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn RoomStore>) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(Arc::clone(&store), rx));
        Self { jobs, store }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn create(&self, record: RoomRecord) {
        self.enqueue(MirrorJob::Create(record));
    }

    pub fn update(&self, room_id: RoomId, update: RecordUpdate) {
        self.enqueue(MirrorJob::Update(room_id, update));
    }

    pub fn save(&self, record: RoomRecord) {
        let room_id = record.room_id.clone();
        self.enqueue(MirrorJob::Update(room_id, RecordUpdate::from_record(record)));
    }

    pub fn close(&self, room_id: RoomId, at: DateTime<Utc>) {
        self.enqueue(MirrorJob::Close(room_id, at));
    }

    /// Resolves once every job queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.enqueue(MirrorJob::Flush(tx));
        let _ = rx.await;
    }

    fn enqueue(&self, job: MirrorJob) {
        if let Err(e) = self.jobs.send(job) {
            log::warn!("Persistence mirror stopped, dropping {}", e.0.describe());
        }
    }
}

async fn run(store: Arc<dyn RoomStore>, mut rx: mpsc::UnboundedReceiver<MirrorJob>) {
    while let Some(job) = rx.recv().await {
        if let MirrorJob::Flush(done) = job {
            let _ = done.send(());
            continue;
        }

        let label = job.describe();
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || apply(store.as_ref(), job)).await {
            Ok(Ok(())) => log::debug!("Persisted {}", label),
            Ok(Err(e)) => log::warn!("Persistence of {} failed: {}", label, e),
            Err(e) => log::error!("Persistence task for {} panicked: {}", label, e),
        }
    }
    log::debug!("Persistence mirror finished");
}

fn apply(store: &dyn RoomStore, job: MirrorJob) -> Result<(), StoreError> {
    match job {
        MirrorJob::Create(record) => store.create(record),
        MirrorJob::Update(room_id, update) => store.update(&room_id, update),
        MirrorJob::Close(room_id, at) => store.close(&room_id, at),
        MirrorJob::Flush(done) => {
            let _ = done.send(());
            Ok(())
        }
    }
}
