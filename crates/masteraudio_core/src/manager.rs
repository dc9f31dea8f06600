//! Audio Manager
//!
//! The client-facing engine. One worker thread owns the stream table and
//! does all rendering; client threads talk to it only through the message
//! queue.
//!
//! # Thread Model
//!
//! ```text
//! client threads ──Message──▶ [bounded queue] ──▶ masteraudio-worker
//!       ▲                                            │ streams, mixer,
//!       └──────────── Reply (pooled slot) ◀──────────┘ chains, renderers
//! ```
//!
//! Asynchronous calls (transport, volume, flush, close) return once posted.
//! Synchronous calls (open, add data, delay, drain, stats) wait for the
//! worker's reply, bounded by `call_timeout_ms`.

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use masteraudio_dsp::{Ac3CodecFactory, ChainOptions, StreamDescriptor};
use masteraudio_platform::{NullRendererFactory, RendererFactory};
use parking_lot::Mutex;
use thunderdome::Arena;
use tracing::{debug, error, info, trace, warn};

use crate::config::ManagerConfig;
use crate::error::{EngineError, EngineResult};
use crate::factory::StreamFactory;
use crate::message::{Message, Reply, StreamId, TransportCommand};
use crate::mixer::HardwareMixer;
use crate::reply_pool::ReplyPool;
use crate::settings::{AudioSettings, PolicySource};
use crate::stream::{AudioStream, StreamStats};

/// Assembles an [`AudioManager`] from its collaborators
pub struct AudioManagerBuilder {
    config: ManagerConfig,
    renderers: Arc<dyn RendererFactory>,
    policy: Arc<dyn PolicySource>,
    ac3_codecs: Option<Arc<dyn Ac3CodecFactory>>,
}

impl Default for AudioManagerBuilder {
    fn default() -> Self {
        Self {
            config: ManagerConfig::default(),
            renderers: Arc::new(NullRendererFactory),
            policy: Arc::new(AudioSettings::default()),
            ac3_codecs: None,
        }
    }
}

impl AudioManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn renderers(mut self, renderers: Arc<dyn RendererFactory>) -> Self {
        self.renderers = renderers;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn PolicySource>) -> Self {
        self.policy = policy;
        self
    }

    /// Codec used when policy asks for AC3 output; without one, streams stay PCM
    pub fn ac3_codecs(mut self, codecs: Arc<dyn Ac3CodecFactory>) -> Self {
        self.ac3_codecs = Some(codecs);
        self
    }

    /// Validate the configuration and start the worker
    pub fn build(self) -> EngineResult<AudioManager> {
        self.config.validate().map_err(EngineError::ConfigError)?;

        let (sender, receiver) = bounded::<Message>(self.config.queue_capacity);
        let open_streams = Arc::new(AtomicUsize::new(0));

        let options = ChainOptions {
            ac3_codecs: self.ac3_codecs,
            endianness: self.config.output.endianness,
        };
        let mixer = HardwareMixer::new(self.renderers, self.config.max_streams);
        let worker = Worker {
            receiver,
            factory: StreamFactory::new(mixer, self.policy, options),
            streams: Arena::new(),
            config: self.config.clone(),
            open_streams: Arc::clone(&open_streams),
        };

        let handle = thread::Builder::new()
            .name("masteraudio-worker".into())
            .spawn(move || worker.run())?;

        Ok(AudioManager {
            sender,
            replies: ReplyPool::new(self.config.reply_pool_size),
            worker: Mutex::new(Some(handle)),
            config: self.config,
            open_streams,
        })
    }
}

/// Multi-stream audio manager
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct AudioManager {
    sender: Sender<Message>,
    replies: ReplyPool,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: ManagerConfig,
    open_streams: Arc<AtomicUsize>,
}

impl AudioManager {
    pub fn builder() -> AudioManagerBuilder {
        AudioManagerBuilder::default()
    }

    /// Manager with default config and policy over `renderers`
    pub fn new(renderers: Arc<dyn RendererFactory>) -> EngineResult<Self> {
        Self::builder().renderers(renderers).build()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn max_streams(&self) -> usize {
        self.config.max_streams
    }

    pub fn open_stream_count(&self) -> usize {
        self.open_streams.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Open a stream for `descriptor`
    ///
    /// `None` when the manager is at capacity or no conversion to an output
    /// format exists; the reason is logged.
    pub fn open_stream(&self, descriptor: &StreamDescriptor) -> Option<StreamId> {
        let reply = self.request("open", self.config.call_timeout(), |reply| Message::Open {
            descriptor: descriptor.clone(),
            reply,
        });
        match reply {
            Ok(Reply::Opened(id)) => id,
            _ => None,
        }
    }

    /// Buffer all of `data` or none of it; returns the bytes accepted
    pub fn add_data_to_stream(&self, id: StreamId, data: &[u8]) -> usize {
        let reply = self.request("add_data", self.config.call_timeout(), |reply| {
            Message::AddData {
                id,
                data: data.to_vec(),
                reply,
            }
        });
        match reply {
            Ok(Reply::Accepted(bytes)) => bytes,
            _ => 0,
        }
    }

    pub fn control_stream(&self, id: StreamId, command: TransportCommand) -> bool {
        self.post(Message::Control { id, command })
    }

    /// Set the stream level in millibels (`0` is unity)
    pub fn set_stream_volume(&self, id: StreamId, millibels: i32) -> bool {
        self.post(Message::SetVolume { id, millibels })
    }

    /// Seconds until audio added now would be heard
    pub fn get_stream_delay(&self, id: StreamId) -> f64 {
        match self.request("get_delay", self.config.call_timeout(), |reply| {
            Message::GetDelay { id, reply }
        }) {
            Ok(Reply::Delay(seconds)) => seconds,
            _ => 0.0,
        }
    }

    /// Play out everything buffered, waiting up to `timeout`
    ///
    /// `false` when the deadline passed first; the remainder is discarded.
    pub fn drain_stream(&self, id: StreamId, timeout: Duration) -> bool {
        let wait = self.config.call_timeout().saturating_add(timeout);
        match self.request("drain", wait, |reply| Message::Drain { id, timeout, reply }) {
            Ok(Reply::Drained(done)) => done,
            _ => false,
        }
    }

    pub fn flush_stream(&self, id: StreamId) -> bool {
        self.post(Message::Flush { id })
    }

    pub fn close_stream(&self, id: StreamId) -> bool {
        self.post(Message::Close { id })
    }

    pub fn stream_stats(&self, id: StreamId) -> Option<StreamStats> {
        match self.request("stats", self.config.call_timeout(), |reply| Message::Stats {
            id,
            reply,
        }) {
            Ok(Reply::Stats(stats)) => stats,
            _ => None,
        }
    }

    /// Stop the worker and close every stream still open
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        match self
            .sender
            .send_timeout(Message::Shutdown, self.config.call_timeout())
        {
            Ok(()) | Err(SendTimeoutError::Disconnected(_)) => {
                if handle.join().is_err() {
                    error!("Audio manager worker panicked during shutdown");
                }
            }
            Err(SendTimeoutError::Timeout(_)) => {
                error!("Audio manager worker not responding, detaching it");
            }
        }
        self.replies.clear();
        info!("Audio manager shut down");
    }

    /// Post an asynchronous message
    fn post(&self, message: Message) -> bool {
        let name = message.name();
        match self.sender.send_timeout(message, self.config.call_timeout()) {
            Ok(()) => true,
            Err(e) => {
                warn!(call = name, error = %e, "Audio manager call not posted");
                false
            }
        }
    }

    /// Post a synchronous message and wait for its reply
    fn request(
        &self,
        what: &'static str,
        timeout: Duration,
        make: impl FnOnce(Sender<Reply>) -> Message,
    ) -> EngineResult<Reply> {
        let slot = self.replies.acquire();
        let sent = self.sender.send_timeout(make(slot.sender()), timeout);
        if let Err(e) = sent {
            self.replies.release(slot);
            let err = match e {
                SendTimeoutError::Timeout(_) => EngineError::Timeout(what),
                SendTimeoutError::Disconnected(_) => EngineError::WorkerUnavailable,
            };
            warn!(call = what, error = %err, "Audio manager call not posted");
            return Err(err);
        }

        match slot.wait(timeout) {
            Ok(reply) => {
                self.replies.release(slot);
                Ok(reply)
            }
            Err(RecvTimeoutError::Timeout) => {
                // A reply that raced the deadline still counts
                if let Ok(reply) = slot.wait(Duration::ZERO) {
                    self.replies.release(slot);
                    return Ok(reply);
                }
                warn!(call = what, ?timeout, "Audio manager call timed out");
                Err(EngineError::Timeout(what))
            }
            Err(RecvTimeoutError::Disconnected) => Err(EngineError::ChannelRecvError),
        }
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PendingDrain {
    /// `None` when the timeout is too large to represent
    deadline: Option<Instant>,
    reply: Sender<Reply>,
    padded: bool,
}

struct StreamEntry {
    stream: AudioStream,
    drain: Option<PendingDrain>,
}

/// State owned by the worker thread
struct Worker {
    receiver: Receiver<Message>,
    factory: StreamFactory,
    streams: Arena<StreamEntry>,
    config: ManagerConfig,
    open_streams: Arc<AtomicUsize>,
}

impl Worker {
    fn run(mut self) {
        info!(
            max_streams = self.config.max_streams,
            renderer = self.factory.mixer().renderer_name(),
            "Audio manager worker started"
        );

        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.iterate())) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(payload) => {
                    error!(
                        reason = panic_reason(payload.as_ref()),
                        "Audio manager worker failed, stopping"
                    );
                    break;
                }
            }
        }

        self.shutdown();
        info!("Audio manager worker stopped");
    }

    /// Wait for work, handle every queued message, then render once
    fn iterate(&mut self) -> ControlFlow<()> {
        let first = if self.streams.is_empty() {
            match self.receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => return ControlFlow::Break(()),
            }
        } else {
            match self.receiver.recv_timeout(self.config.render_interval()) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return ControlFlow::Break(()),
            }
        };

        let mut next = first;
        while let Some(message) = next {
            self.dispatch(message)?;
            next = self.receiver.try_recv().ok();
        }

        self.render_pass();
        ControlFlow::Continue(())
    }

    fn dispatch(&mut self, message: Message) -> ControlFlow<()> {
        trace!(message = message.name(), "Dispatching");
        match message {
            Message::Open { descriptor, reply } => {
                let id = self.open(&descriptor);
                if let (Some(id), Err(e)) = (id, deliver(&reply, Reply::Opened(id))) {
                    warn!(%id, error = %e, "Open caller stopped waiting, closing the stream");
                    self.close(id);
                }
            }
            Message::AddData { id, data, reply } => self.add_data(id, &data, &reply),
            Message::GetDelay { id, reply } => {
                let delay = self.entry_mut(id).map_or(0.0, |entry| entry.stream.delay());
                let _ = deliver(&reply, Reply::Delay(delay));
            }
            Message::Drain { id, timeout, reply } => self.begin_drain(id, timeout, reply),
            Message::Stats { id, reply } => {
                let stats = self.streams.get(id.0).map(|entry| entry.stream.stats());
                let _ = deliver(&reply, Reply::Stats(stats));
            }
            Message::Control { id, command } => {
                self.with_stream(id, "control", |stream| stream.control(command))
            }
            Message::SetVolume { id, millibels } => {
                self.with_stream(id, "set_volume", |stream| stream.set_volume(millibels))
            }
            Message::Flush { id } => self.with_stream(id, "flush", AudioStream::flush),
            Message::Close { id } => self.close(id),
            Message::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn entry_mut(&mut self, id: StreamId) -> EngineResult<&mut StreamEntry> {
        self.streams
            .get_mut(id.0)
            .ok_or(EngineError::StreamNotFound(id))
    }

    fn with_stream(&mut self, id: StreamId, call: &'static str, f: impl FnOnce(&mut AudioStream)) {
        match self.entry_mut(id) {
            Ok(entry) => f(&mut entry.stream),
            Err(e) => debug!(error = %e, call, "Call ignored"),
        }
    }

    /// Buffer `data` only once the caller is known to receive the count
    fn add_data(&mut self, id: StreamId, data: &[u8], reply: &Sender<Reply>) {
        let entry = match self.entry_mut(id) {
            Ok(entry) if entry.stream.can_accept(data.len()) => entry,
            Ok(_) => {
                let _ = deliver(reply, Reply::Accepted(0));
                return;
            }
            Err(e) => {
                debug!(error = %e, "add_data ignored");
                let _ = deliver(reply, Reply::Accepted(0));
                return;
            }
        };

        if let Err(e) = deliver(reply, Reply::Accepted(data.len())) {
            warn!(%id, bytes = data.len(), error = %e, "add_data caller stopped waiting, data dropped");
            return;
        }
        let accepted = entry.stream.add_data(data);
        if accepted != data.len() {
            warn!(%id, accepted, bytes = data.len(), "Stream input refused acknowledged data");
        }
    }

    fn open(&mut self, descriptor: &StreamDescriptor) -> Option<StreamId> {
        if self.streams.len() >= self.config.max_streams {
            warn!(
                active = self.streams.len(),
                max = self.config.max_streams,
                "Cannot open stream: capacity exhausted"
            );
            return None;
        }

        match self.factory.create(descriptor) {
            Ok(mut stream) => {
                stream.open();
                let id = StreamId(self.streams.insert(StreamEntry {
                    stream,
                    drain: None,
                }));
                self.open_streams.store(self.streams.len(), Ordering::Release);
                info!(
                    %id,
                    active = self.streams.len(),
                    max = self.config.max_streams,
                    "Stream opened"
                );
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, format = %descriptor, "Stream open failed");
                None
            }
        }
    }

    fn close(&mut self, id: StreamId) {
        let Some(mut entry) = self.streams.remove(id.0) else {
            debug!(%id, "Close for unknown stream ignored");
            return;
        };
        if let Some(drain) = entry.drain.take() {
            let _ = deliver(&drain.reply, Reply::Drained(false));
        }
        let channel = entry.stream.close();
        self.factory.release(channel);
        self.open_streams.store(self.streams.len(), Ordering::Release);
        info!(
            %id,
            active = self.streams.len(),
            max = self.config.max_streams,
            "Stream closed"
        );
    }

    fn begin_drain(&mut self, id: StreamId, timeout: Duration, reply: Sender<Reply>) {
        let entry = match self.entry_mut(id) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Drain ignored");
                let _ = deliver(&reply, Reply::Drained(false));
                return;
            }
        };
        if entry.drain.is_some() || !entry.stream.begin_drain() {
            let _ = deliver(&reply, Reply::Drained(false));
            return;
        }
        debug!(%id, ?timeout, "Stream draining");
        entry.drain = Some(PendingDrain {
            deadline: Instant::now().checked_add(timeout),
            reply,
            padded: false,
        });
    }

    fn render_pass(&mut self) {
        let now = Instant::now();
        for (index, entry) in self.streams.iter_mut() {
            entry.stream.render();
            if entry.drain.is_some() {
                Self::progress_drain(StreamId(index), entry, now);
            }
        }
    }

    /// Finish, pad or time out a pending drain after a render pass
    fn progress_drain(id: StreamId, entry: &mut StreamEntry, now: Instant) {
        let Some(drain) = entry.drain.as_mut() else {
            return;
        };
        let stream = &mut entry.stream;

        let outcome = if stream.is_drained() {
            Some(true)
        } else if drain.deadline.is_some_and(|deadline| now >= deadline) {
            stream.flush();
            Some(false)
        } else {
            // A tail shorter than one pull never renders on its own
            if stream.is_renderable() && stream.last_pass_starved() && stream.buffered_input() > 0 {
                if drain.padded {
                    stream.discard_input();
                } else {
                    stream.pad_tail();
                    drain.padded = true;
                }
            }
            None
        };

        if let Some(completed) = outcome {
            stream.end_drain();
            debug!(%id, completed, "Stream drain finished");
            if let Some(drain) = entry.drain.take() {
                let _ = deliver(&drain.reply, Reply::Drained(completed));
            }
        }
    }

    /// Answer whatever is still queued, then close every stream
    fn shutdown(&mut self) {
        while let Ok(message) = self.receiver.try_recv() {
            message.reject();
        }

        let ids: Vec<StreamId> = self.streams.iter().map(|(index, _)| StreamId(index)).collect();
        if !ids.is_empty() {
            info!(count = ids.len(), "Force-closing streams at shutdown");
        }
        for id in ids {
            self.close(id);
        }
    }
}

/// Hand a reply to its caller; fails once the caller has stopped waiting
fn deliver(reply: &Sender<Reply>, value: Reply) -> EngineResult<()> {
    reply
        .try_send(value)
        .map_err(|_| EngineError::ChannelSendError)
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
