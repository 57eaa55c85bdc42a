//! Response recorder ("resumer").
//!
//! Lets a client resume an in-flight LLM stream after a reconnect, or hand
//! it off between browser tabs. The producer (the chat backend) records
//! token chunks; any number of replayers receive everything buffered so
//! far and then follow along live until the session completes.
//!
//! Buffers live on the node that accepted the producer stream: a bounded
//! in-memory window of recent chunks plus a per-session spill file, so a
//! slow replayer never applies backpressure to the producer. A
//! [`LocatorStore`] maps conversation id → node for cluster routing; when
//! no locator is configured the feature is disabled and surfaces as
//! `unimplemented`.
//!
//! When a session completes — including a producer that dies mid-stream
//! and drops its handle — the buffered output is handed to a
//! [`CompletionSink`] that persists it as a transcript entry, so an
//! interrupted generation still leaves the conversation consistent.
//!
//! Sessions survive briefly after completion for late resumes, then the
//! map entry, spill file, and locator entry are reaped.

mod locator;

use std::{
    collections::VecDeque,
    io,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::{Mutex, Notify},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use locator::{LocatorError, LocatorStore, MemoryLocatorStore, ResumeLocator};
#[cfg(feature = "redis")]
pub use locator::RedisLocatorStore;

use crate::{
    auth::Subject,
    config::{ResumerConfig, ResumerKind},
    observability::metrics,
    services::{ServiceError, ServiceResult},
};

/// Receives a finished session's buffered output for persistence.
///
/// Called once per completed session with everything the producer wrote
/// before finishing or dying. Implementations write under the recorder's
/// own authority; the producer's access was checked when the recording
/// started.
#[async_trait::async_trait]
pub trait CompletionSink: Send + Sync {
    async fn persist(
        &self,
        conversation_id: Uuid,
        user_id: Option<String>,
        client_id: Option<String>,
        output: String,
    ) -> ServiceResult<()>;
}

/// Lifecycle of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Recording,
    Completed,
    Cancelled,
}

/// A frame delivered to replayers. Terminal frames are broadcast to every
/// subscriber before their streams close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderFrame {
    Chunk(Bytes),
    Done,
    Cancelled,
}

/// Recent chunks kept in memory; older ones are served from the spill file.
struct ChunkWindow {
    base: usize,
    chunks: VecDeque<Bytes>,
}

struct SpillWriter {
    file: File,
    written: u64,
}

/// One live recording, shared by the producer and all replayers.
pub struct RecorderSession {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Producer identity captured when the recording started; stamped on
    /// the persisted transcript entry.
    user_id: Option<String>,
    client_id: Option<String>,
    spill_path: PathBuf,
    writer: Mutex<SpillWriter>,
    /// (payload offset, payload length) per chunk, in order.
    index: RwLock<Vec<(u64, u32)>>,
    window: RwLock<ChunkWindow>,
    window_capacity: usize,
    state: RwLock<SessionState>,
    notify: Notify,
}

impl RecorderSession {
    async fn create(
        conversation_id: Uuid,
        subject: &Subject,
        spill_dir: &std::path::Path,
        window_capacity: usize,
    ) -> io::Result<Arc<Self>> {
        let id = Uuid::new_v4();
        let spill_path = spill_dir.join(format!("mnemo-resume-{id}.spill"));
        let file = File::create(&spill_path).await?;

        Ok(Arc::new(Self {
            id,
            conversation_id,
            user_id: Some(subject.user_id.clone()),
            client_id: subject.client_id.clone(),
            spill_path,
            writer: Mutex::new(SpillWriter { file, written: 0 }),
            index: RwLock::new(Vec::new()),
            window: RwLock::new(ChunkWindow {
                base: 0,
                chunks: VecDeque::new(),
            }),
            window_capacity,
            state: RwLock::new(SessionState::Recording),
            notify: Notify::new(),
        }))
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().expect("state lock")
    }

    fn set_state(&self, state: SessionState) -> bool {
        let mut guard = self.state.write().expect("state lock");
        if *guard != SessionState::Recording {
            return false;
        }
        *guard = state;
        drop(guard);
        self.notify.notify_waiters();
        true
    }

    fn chunk_count(&self) -> usize {
        self.index.read().expect("index lock").len()
    }

    /// Producer side: persist the chunk to the spill file, then publish it.
    async fn append(&self, chunk: Bytes) -> io::Result<()> {
        let offset;
        {
            let mut writer = self.writer.lock().await;
            let len = chunk.len() as u32;
            writer.file.write_all(&len.to_be_bytes()).await?;
            writer.file.write_all(&chunk).await?;
            writer.file.flush().await?;
            offset = writer.written + 4;
            writer.written += 4 + chunk.len() as u64;
        }

        {
            let mut window = self.window.write().expect("window lock");
            window.chunks.push_back(chunk.clone());
            if window.chunks.len() > self.window_capacity {
                window.chunks.pop_front();
                window.base += 1;
            }
        }
        self.index
            .write()
            .expect("index lock")
            .push((offset, chunk.len() as u32));

        self.notify.notify_waiters();
        Ok(())
    }

    /// Replayer side: in-memory window when the chunk is recent, otherwise
    /// a positioned read from the spill file using the caller's own handle.
    async fn read_chunk(&self, pos: usize, file: &mut Option<File>) -> io::Result<Bytes> {
        {
            let window = self.window.read().expect("window lock");
            if pos >= window.base {
                if let Some(chunk) = window.chunks.get(pos - window.base) {
                    return Ok(chunk.clone());
                }
            }
        }

        let (offset, len) = {
            let index = self.index.read().expect("index lock");
            *index
                .get(pos)
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "chunk out of range"))?
        };

        if file.is_none() {
            *file = Some(File::open(&self.spill_path).await?);
        }
        let handle = file.as_mut().expect("file just opened");
        handle.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        handle.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Everything the producer wrote, concatenated, for the completion
    /// sink. Reads from the spill file so the in-memory window size does
    /// not matter.
    async fn collect_output(&self) -> io::Result<String> {
        let mut file: Option<File> = None;
        let mut output = Vec::new();
        for pos in 0..self.chunk_count() {
            let chunk = self.read_chunk(pos, &mut file).await?;
            output.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Resolves once the session leaves `Recording`, letting the producer
    /// observe cancellation without polling.
    pub async fn ended(&self) -> SessionState {
        loop {
            let notified = self.notify.notified();
            let state = self.state();
            if state != SessionState::Recording {
                return state;
            }
            notified.await;
        }
    }
}

/// Replay a session: everything recorded so far, then live chunks, then
/// the terminal frame.
fn replay_stream(
    session: Arc<RecorderSession>,
) -> impl Stream<Item = io::Result<RecorderFrame>> + Send {
    async_stream::try_stream! {
        let mut pos = 0usize;
        let mut file: Option<File> = None;
        loop {
            // Register interest before checking, so an append between the
            // check and the await still wakes us.
            let notified = session.notify.notified();

            if pos < session.chunk_count() {
                let chunk = session.read_chunk(pos, &mut file).await?;
                pos += 1;
                yield RecorderFrame::Chunk(chunk);
                continue;
            }

            match session.state() {
                SessionState::Recording => notified.await,
                SessionState::Completed => {
                    yield RecorderFrame::Done;
                    break;
                }
                SessionState::Cancelled => {
                    yield RecorderFrame::Cancelled;
                    break;
                }
            }
        }
    }
}

/// Producer handle for one recording session.
///
/// Dropping the handle mid-stream completes the session, so whatever was
/// buffered before a failure stays replayable for the retention window.
pub struct RecordHandle {
    session: Arc<RecorderSession>,
    recorder: ResponseRecorder,
}

impl RecordHandle {
    /// Append a chunk. Returns `false` when the session has been cancelled
    /// and the producer should stop.
    pub async fn append(&self, chunk: Bytes) -> ServiceResult<bool> {
        if self.session.state() == SessionState::Cancelled {
            return Ok(false);
        }
        self.session
            .append(chunk)
            .await
            .map_err(|e| ServiceError::Storage(format!("spill write: {e}")))?;
        Ok(true)
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.state() == SessionState::Cancelled
    }

    /// Resolves with the terminal state once the session ends — in
    /// particular when a consumer cancels it mid-stream.
    pub async fn ended(&self) -> SessionState {
        self.session.ended().await
    }

    pub fn complete(self) {
        if self.session.set_state(SessionState::Completed) {
            metrics::record_recorder_event("complete");
            debug!(conversation_id = %self.session.conversation_id, "Recording completed");
            self.recorder.finish_session(&self.session);
        }
    }
}

impl Drop for RecordHandle {
    fn drop(&mut self) {
        // Producer went away without completing; persist what we have so
        // the transcript stays consistent after an interrupted stream.
        if self.session.set_state(SessionState::Completed) {
            self.recorder.finish_session(&self.session);
        }
    }
}

struct RecorderInner {
    sessions: DashMap<Uuid, Arc<RecorderSession>>,
    locator: Option<Arc<dyn LocatorStore>>,
    sink: Option<Arc<dyn CompletionSink>>,
    node_id: String,
    spill_dir: PathBuf,
    config: ResumerConfig,
}

/// Process-wide map of live recording sessions, keyed by conversation id.
#[derive(Clone)]
pub struct ResponseRecorder {
    inner: Arc<RecorderInner>,
}

impl ResponseRecorder {
    pub fn new(
        config: ResumerConfig,
        locator: Option<Arc<dyn LocatorStore>>,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> Self {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| {
                std::env::var("HOSTNAME").unwrap_or_else(|_| "mnemo-single-node".to_string())
            });
        let spill_dir = config
            .spill_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Self {
            inner: Arc::new(RecorderInner {
                sessions: DashMap::new(),
                locator,
                sink,
                node_id,
                spill_dir,
                config,
            }),
        }
    }

    /// Build from configuration, choosing the locator backend.
    pub fn from_config(
        config: ResumerConfig,
        sink: Option<Arc<dyn CompletionSink>>,
    ) -> ServiceResult<Self> {
        let locator: Option<Arc<dyn LocatorStore>> = match config.kind {
            ResumerKind::None => None,
            ResumerKind::Memory => Some(Arc::new(MemoryLocatorStore::new())),
            #[cfg(feature = "redis")]
            ResumerKind::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| ServiceError::Internal("resumer.redis_url missing".into()))?;
                Some(Arc::new(RedisLocatorStore::new(url).map_err(|e| {
                    ServiceError::Internal(format!("redis locator: {e}"))
                })?))
            }
            #[cfg(not(feature = "redis"))]
            ResumerKind::Redis => {
                return Err(ServiceError::Internal(
                    "resumer.kind = \"redis\" requires the 'redis' feature".into(),
                ));
            }
        };
        Ok(Self::new(config, locator, sink))
    }

    pub fn enabled(&self) -> bool {
        self.inner.locator.is_some()
    }

    fn require_enabled(&self) -> ServiceResult<&Arc<dyn LocatorStore>> {
        self.inner
            .locator
            .as_ref()
            .ok_or_else(|| ServiceError::Unimplemented("response recording is disabled".into()))
    }

    /// Open a recording session for a conversation. One producer at a time.
    pub async fn record(
        &self,
        conversation_id: Uuid,
        subject: &Subject,
    ) -> ServiceResult<RecordHandle> {
        let locator = self.require_enabled()?;

        if let Some(existing) = self.inner.sessions.get(&conversation_id) {
            if existing.state() == SessionState::Recording {
                return Err(ServiceError::Conflict(
                    "a recording is already in progress for this conversation".into(),
                ));
            }
        }

        let session = RecorderSession::create(
            conversation_id,
            subject,
            &self.inner.spill_dir,
            self.inner.config.buffer_chunks,
        )
        .await
        .map_err(|e| ServiceError::Storage(format!("spill file: {e}")))?;

        locator
            .put(
                conversation_id,
                &ResumeLocator {
                    node_id: self.inner.node_id.clone(),
                    session_id: session.id,
                },
                self.inner.config.locator_ttl(),
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "Locator unavailable; refusing to record");
                ServiceError::Unimplemented("resume locator is unavailable".into())
            })?;

        self.inner.sessions.insert(conversation_id, session.clone());
        metrics::record_recorder_event("record");
        info!(conversation_id = %conversation_id, session_id = %session.id, "Recording started");

        Ok(RecordHandle {
            session,
            recorder: self.clone(),
        })
    }

    /// Subscribe to a conversation's live (or recently finished) session.
    pub async fn replay(
        &self,
        conversation_id: Uuid,
    ) -> ServiceResult<impl Stream<Item = io::Result<RecorderFrame>> + Send> {
        let locator = self.require_enabled()?;

        if let Some(session) = self.inner.sessions.get(&conversation_id) {
            metrics::record_recorder_event("replay");
            return Ok(replay_stream(session.clone()));
        }

        // Not local. The locator tells a routing tier where to go; from
        // this node's perspective the session does not exist.
        match locator.get(conversation_id).await {
            Ok(Some(entry)) if entry.node_id != self.inner.node_id => {
                debug!(conversation_id = %conversation_id, node = %entry.node_id, "Session lives on another node");
                Err(ServiceError::NotFound)
            }
            _ => Err(ServiceError::NotFound),
        }
    }

    /// Ask the producer to stop. Replayers observe a `Cancelled` frame.
    pub async fn cancel(&self, conversation_id: Uuid) -> ServiceResult<()> {
        self.require_enabled()?;
        let session = self
            .inner
            .sessions
            .get(&conversation_id)
            .map(|s| s.clone())
            .ok_or(ServiceError::NotFound)?;
        if session.set_state(SessionState::Cancelled) {
            metrics::record_recorder_event("cancel");
            info!(conversation_id = %conversation_id, "Recording cancelled");
            self.schedule_cleanup(&session);
        }
        Ok(())
    }

    /// Filter the given conversations down to those currently resumable —
    /// here or, per the locator, anywhere in the cluster.
    pub async fn check_recordings(&self, ids: &[Uuid]) -> ServiceResult<Vec<Uuid>> {
        let locator = self.require_enabled()?;

        let mut resumable = Vec::new();
        for &id in ids {
            if self.inner.sessions.contains_key(&id) {
                resumable.push(id);
                continue;
            }
            if let Ok(Some(_)) = locator.get(id).await {
                resumable.push(id);
            }
        }
        Ok(resumable)
    }

    /// Completion hook: hand the buffered output to the sink, then reap
    /// the session after the late-resume window.
    ///
    /// Runs on normal completion and on producer death alike; cancellation
    /// skips persistence because the consumer explicitly discarded the
    /// stream.
    fn finish_session(&self, session: &Arc<RecorderSession>) {
        self.persist_output(session);
        self.schedule_cleanup(session);
    }

    fn persist_output(&self, session: &Arc<RecorderSession>) {
        let Some(sink) = self.inner.sink.clone() else {
            return;
        };
        if session.chunk_count() == 0 {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        let session = Arc::clone(session);
        tokio::spawn(async move {
            let output = match session.collect_output().await {
                Ok(output) => output,
                Err(e) => {
                    warn!(
                        conversation_id = %session.conversation_id,
                        error = %e,
                        "Failed to read buffered output for persistence"
                    );
                    return;
                }
            };
            if output.is_empty() {
                return;
            }
            if let Err(e) = sink
                .persist(
                    session.conversation_id,
                    session.user_id.clone(),
                    session.client_id.clone(),
                    output,
                )
                .await
            {
                warn!(
                    conversation_id = %session.conversation_id,
                    error = %e,
                    "Failed to persist recorded output"
                );
            } else {
                debug!(
                    conversation_id = %session.conversation_id,
                    "Recorded output persisted to transcript"
                );
            }
        });
    }

    /// Remove the session after the late-resume window.
    fn schedule_cleanup(&self, session: &Arc<RecorderSession>) {
        let inner = self.inner.clone();
        let conversation_id = session.conversation_id;
        let session_id = session.id;
        let retain = self.inner.config.retain_completed();

        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(retain).await;

            // Only remove the session this cleanup was scheduled for; a new
            // recording may have replaced it. The guard from get() must drop
            // before remove() touches the same shard.
            let is_current = inner
                .sessions
                .get(&conversation_id)
                .map(|current| current.id == session_id)
                .unwrap_or(false);
            let removed = if is_current {
                inner.sessions.remove(&conversation_id)
            } else {
                None
            };
            if let Some((_, session)) = removed {
                if let Err(e) = tokio::fs::remove_file(&session.spill_path).await {
                    if e.kind() != io::ErrorKind::NotFound {
                        warn!(error = %e, "Failed to remove spill file");
                    }
                }
                if let Some(locator) = &inner.locator {
                    let _ = locator.delete(conversation_id).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;

    /// Captures persisted output so tests can assert on the completion
    /// hook.
    #[derive(Default)]
    struct CapturingSink {
        persisted: std::sync::Mutex<Vec<(Uuid, Option<String>, Option<String>, String)>>,
    }

    #[async_trait::async_trait]
    impl CompletionSink for CapturingSink {
        async fn persist(
            &self,
            conversation_id: Uuid,
            user_id: Option<String>,
            client_id: Option<String>,
            output: String,
        ) -> ServiceResult<()> {
            self.persisted
                .lock()
                .unwrap()
                .push((conversation_id, user_id, client_id, output));
            Ok(())
        }
    }

    fn test_config() -> ResumerConfig {
        ResumerConfig {
            kind: ResumerKind::Memory,
            spill_dir: Some(std::env::temp_dir().to_string_lossy().into_owned()),
            retain_completed_secs: 5,
            ..Default::default()
        }
    }

    fn test_recorder() -> ResponseRecorder {
        ResponseRecorder::from_config(test_config(), None).unwrap()
    }

    fn test_recorder_with_sink() -> (ResponseRecorder, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::default());
        let recorder = ResponseRecorder::from_config(test_config(), Some(sink.clone())).unwrap();
        (recorder, sink)
    }

    fn producer() -> Subject {
        Subject::with_client("alice", "chat-backend")
    }

    async fn collect(
        stream: impl Stream<Item = io::Result<RecorderFrame>> + Send,
    ) -> Vec<RecorderFrame> {
        stream.map(|frame| frame.unwrap()).collect().await
    }

    #[tokio::test]
    async fn replay_gets_prefix_then_live_suffix() {
        let recorder = test_recorder();
        let conversation = Uuid::new_v4();
        let handle = recorder.record(conversation, &producer()).await.unwrap();

        handle.append(Bytes::from("he")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.append(Bytes::from("llo")).await.unwrap();

        // Replayer connects after "llo" is flushed.
        let replay = recorder.replay(conversation).await.unwrap();
        let collector = tokio::spawn(collect(replay));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.append(Bytes::from(" world")).await.unwrap();
        handle.complete();

        let frames = collector.await.unwrap();
        assert_eq!(
            frames,
            vec![
                RecorderFrame::Chunk(Bytes::from("he")),
                RecorderFrame::Chunk(Bytes::from("llo")),
                RecorderFrame::Chunk(Bytes::from(" world")),
                RecorderFrame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn cancel_reaches_producer_and_replayers() {
        let recorder = test_recorder();
        let conversation = Uuid::new_v4();
        let handle = recorder.record(conversation, &producer()).await.unwrap();
        handle.append(Bytes::from("partial")).await.unwrap();

        let replay = recorder.replay(conversation).await.unwrap();
        let collector = tokio::spawn(collect(replay));

        recorder.cancel(conversation).await.unwrap();

        // The producer observes cancellation and stops appending.
        assert_eq!(handle.ended().await, SessionState::Cancelled);
        assert!(handle.is_cancelled());
        assert!(!handle.append(Bytes::from("ignored")).await.unwrap());

        let frames = collector.await.unwrap();
        assert_eq!(
            frames,
            vec![
                RecorderFrame::Chunk(Bytes::from("partial")),
                RecorderFrame::Cancelled,
            ]
        );
    }

    #[tokio::test]
    async fn late_replay_after_completion_sees_everything() {
        let recorder = test_recorder();
        let conversation = Uuid::new_v4();
        let handle = recorder.record(conversation, &producer()).await.unwrap();
        handle.append(Bytes::from("all")).await.unwrap();
        handle.append(Bytes::from(" done")).await.unwrap();
        handle.complete();

        let frames = collect(recorder.replay(conversation).await.unwrap()).await;
        assert_eq!(
            frames,
            vec![
                RecorderFrame::Chunk(Bytes::from("all")),
                RecorderFrame::Chunk(Bytes::from(" done")),
                RecorderFrame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn slow_replayer_reads_spilled_chunks() {
        let config = ResumerConfig {
            kind: ResumerKind::Memory,
            spill_dir: Some(std::env::temp_dir().to_string_lossy().into_owned()),
            buffer_chunks: 2,
            retain_completed_secs: 5,
            ..Default::default()
        };
        let recorder = ResponseRecorder::from_config(config, None).unwrap();
        let conversation = Uuid::new_v4();
        let handle = recorder.record(conversation, &producer()).await.unwrap();

        // Push well past the in-memory window so early chunks only exist in
        // the spill file.
        for i in 0..10 {
            handle.append(Bytes::from(format!("chunk-{i}"))).await.unwrap();
        }
        handle.complete();

        let frames = collect(recorder.replay(conversation).await.unwrap()).await;
        assert_eq!(frames.len(), 11);
        assert_eq!(frames[0], RecorderFrame::Chunk(Bytes::from("chunk-0")));
        assert_eq!(frames[9], RecorderFrame::Chunk(Bytes::from("chunk-9")));
        assert_eq!(frames[10], RecorderFrame::Done);
    }

    #[tokio::test]
    async fn second_producer_conflicts() {
        let recorder = test_recorder();
        let conversation = Uuid::new_v4();
        let _handle = recorder.record(conversation, &producer()).await.unwrap();
        assert!(matches!(
            recorder.record(conversation, &producer()).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn disabled_recorder_is_unimplemented() {
        let recorder = ResponseRecorder::from_config(ResumerConfig::default(), None).unwrap();
        assert!(!recorder.enabled());
        assert!(matches!(
            recorder.record(Uuid::new_v4(), &producer()).await,
            Err(ServiceError::Unimplemented(_))
        ));
        assert!(matches!(
            recorder.replay(Uuid::new_v4()).await.map(|_| ()),
            Err(ServiceError::Unimplemented(_))
        ));
    }

    #[tokio::test]
    async fn check_recordings_filters_to_live_sessions() {
        let recorder = test_recorder();
        let recording = Uuid::new_v4();
        let other = Uuid::new_v4();
        let _handle = recorder.record(recording, &producer()).await.unwrap();

        let resumable = recorder
            .check_recordings(&[recording, other])
            .await
            .unwrap();
        assert_eq!(resumable, vec![recording]);
    }

    #[tokio::test]
    async fn completion_persists_buffered_output() {
        let (recorder, sink) = test_recorder_with_sink();
        let conversation = Uuid::new_v4();
        let handle = recorder.record(conversation, &producer()).await.unwrap();

        handle.append(Bytes::from("he")).await.unwrap();
        handle.append(Bytes::from("llo")).await.unwrap();
        handle.complete();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let persisted = sink.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        let (id, user_id, client_id, output) = &persisted[0];
        assert_eq!(*id, conversation);
        assert_eq!(user_id.as_deref(), Some("alice"));
        assert_eq!(client_id.as_deref(), Some("chat-backend"));
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn producer_death_still_persists_the_partial_stream() {
        let (recorder, sink) = test_recorder_with_sink();
        let conversation = Uuid::new_v4();
        let handle = recorder.record(conversation, &producer()).await.unwrap();

        handle.append(Bytes::from("partial out")).await.unwrap();
        // Producer dies without calling complete().
        drop(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let persisted = sink.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].3, "partial out");
    }

    #[tokio::test]
    async fn cancelled_and_empty_sessions_are_not_persisted() {
        let (recorder, sink) = test_recorder_with_sink();

        // Cancelled: the consumer discarded the stream.
        let cancelled = Uuid::new_v4();
        let handle = recorder.record(cancelled, &producer()).await.unwrap();
        handle.append(Bytes::from("discarded")).await.unwrap();
        recorder.cancel(cancelled).await.unwrap();
        drop(handle);

        // Completed without a single chunk: nothing to persist.
        let empty = Uuid::new_v4();
        let handle = recorder.record(empty, &producer()).await.unwrap();
        handle.complete();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.persisted.lock().unwrap().is_empty());
    }
}
