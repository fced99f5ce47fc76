//! Sync Coordinator
//!
//! Owns the local playback session and the [`SyncState`]. All mutation happens
//! on a single task: receive loops and file analysis only produce commands,
//! and the actor applies them one at a time. Observers follow along through a
//! `watch` channel of [`SyncSnapshot`]s.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::fingerprint::{self, FileAnalysisError, PREFIX_LEN};
use crate::network::SessionChannel;
use crate::player::{MediaProbe, Player, SeekTolerance};
use crate::sync::{
    clock_correction, reconcile_files, FileDescriptor, Notice, PlaybackClockSample, SessionRole,
    SyncMessage, SyncSnapshot, SyncState, SEEK_THRESHOLD_SECS, SIMILAR_DURATION_SECS,
};

/// Coordinator tuning
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often a playing participant broadcasts its position
    pub broadcast_interval: Duration,
    /// Clock offset beyond which we seek to the remote position
    pub seek_threshold_secs: f64,
    /// Duration window for the "similar files" warning
    pub similar_duration_secs: f64,
    /// Bytes covered by the content digest
    pub prefix_len: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_secs(1),
            seek_threshold_secs: SEEK_THRESHOLD_SECS,
            similar_duration_secs: SIMILAR_DURATION_SECS,
            prefix_len: PREFIX_LEN,
        }
    }
}

/// Errors returned by [`CoordinatorHandle`] operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Coordinator is not running")]
    Stopped,

    #[error("Error analyzing file: {0}")]
    FileAnalysis(#[from] FileAnalysisError),
}

enum Command {
    AttachSession {
        channel: Arc<dyn SessionChannel>,
        role: SessionRole,
    },
    LocalFileAnalyzed {
        path: PathBuf,
        file: FileDescriptor,
    },
    RemoteClock(PlaybackClockSample),
    RemoteFile(FileDescriptor),
    PeerJoined,
    SetNotice(Notice),
    TogglePlayPause,
    AcknowledgeNotice,
    Snapshot(oneshot::Sender<SyncSnapshot>),
    Shutdown,
}

/// The actor. Created and driven by [`SyncCoordinator::spawn`].
pub struct SyncCoordinator {
    state: SyncState,
    player: Arc<dyn Player>,
    config: CoordinatorConfig,
    channel: Option<Arc<dyn SessionChannel>>,
    /// Receive loops for the attached channel
    listeners: Vec<JoinHandle<()>>,
    /// Weak so the actor stops once every handle is dropped
    commands: mpsc::WeakUnboundedSender<Command>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
}

impl SyncCoordinator {
    /// Start the coordinator task. Must be called within a tokio runtime.
    pub fn spawn(
        player: Arc<dyn Player>,
        probe: Arc<dyn MediaProbe>,
        config: CoordinatorConfig,
    ) -> CoordinatorHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());

        let handle = CoordinatorHandle {
            command_tx: command_tx.clone(),
            snapshot_rx,
            probe,
            prefix_len: config.prefix_len,
        };

        let coordinator = SyncCoordinator {
            state: SyncState::new(),
            player,
            config,
            channel: None,
            listeners: Vec::new(),
            commands: command_tx.downgrade(),
            snapshot_tx,
        };

        tokio::spawn(coordinator.run(command_rx));
        handle
    }

    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        info!("Sync coordinator started");

        let mut ticker = tokio::time::interval(self.config.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                _ = ticker.tick() => self.broadcast_clock(),
            }
            self.publish_snapshot();
        }

        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        info!("Sync coordinator stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::AttachSession { channel, role } => self.attach_session(channel, role),
            Command::LocalFileAnalyzed { path, file } => self.apply_local_file(path, file),
            Command::RemoteClock(sample) => self.on_remote_clock(sample),
            Command::RemoteFile(file) => self.on_remote_file(file),
            Command::PeerJoined => self.on_peer_joined(),
            Command::SetNotice(notice) => {
                debug!("Notice: {}", notice);
                self.state.set_notice(notice);
            }
            Command::TogglePlayPause => self.toggle_play_pause(),
            Command::AcknowledgeNotice => self.state.acknowledge_notice(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn snapshot(&self) -> SyncSnapshot {
        self.state
            .snapshot(self.player.is_playing(), self.channel.is_some())
    }

    fn publish_snapshot(&self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn attach_session(&mut self, channel: Arc<dyn SessionChannel>, role: SessionRole) {
        if self.state.enter_session(role) {
            info!("Session started as {:?}", role);
        } else {
            info!("Session reattached, keeping role {:?}", self.state.role);
        }

        for listener in self.listeners.drain(..) {
            listener.abort();
        }

        // Subscribe before spawning so nothing sent after attach is missed
        self.listeners.push(tokio::spawn(listen(
            "clock",
            channel.subscribe(),
            self.commands.clone(),
            |message| message.as_clock().map(Command::RemoteClock),
        )));
        self.listeners.push(tokio::spawn(listen(
            "file",
            channel.subscribe(),
            self.commands.clone(),
            |message| message.into_file().map(Command::RemoteFile),
        )));

        self.channel = Some(channel);

        // Participants who arrive after we picked a file still need to hear about it
        if let Some(file) = self.state.local_file.clone() {
            self.share_file(file);
        }
    }

    fn apply_local_file(&mut self, path: PathBuf, file: FileDescriptor) {
        info!("Selected {} ({})", file.filename, path.display());
        self.state.update_local_file(file.clone(), path.clone());

        if let Some(remote) = self.state.remote_file.clone() {
            let result = reconcile_files(&file, &remote, self.config.similar_duration_secs);
            self.state.apply_reconciliation(result);
        }

        if let Err(e) = self.player.load(&path) {
            warn!("Player failed to load {}: {}", path.display(), e);
            self.state.set_notice(Notice::PlaybackFailed(e.to_string()));
        }

        self.share_file(file);
    }

    fn on_remote_file(&mut self, remote: FileDescriptor) {
        debug!(
            "Peer selected {} (digest {})",
            remote.filename, remote.content_digest
        );
        self.state.update_remote_file(remote.clone());

        let result = self
            .state
            .local_file
            .as_ref()
            .map(|local| reconcile_files(local, &remote, self.config.similar_duration_secs));

        match result {
            Some(result) => {
                if !result.files_match {
                    info!("Local file does not match {}", remote.filename);
                }
                self.state.apply_reconciliation(result);
            }
            None => self.state.set_notice(Notice::SelectRemoteFile {
                filename: remote.filename,
            }),
        }
    }

    fn on_peer_joined(&self) {
        if let Some(file) = self.state.local_file.clone() {
            debug!("Participant joined, re-announcing {}", file.filename);
            self.share_file(file);
        }
    }

    fn on_remote_clock(&mut self, sample: PlaybackClockSample) {
        // Nothing to correct until a file is loaded
        if self.state.selected_path.is_none() {
            return;
        }

        let position = self.player.position();
        if let Some(target) = clock_correction(position, sample, self.config.seek_threshold_secs) {
            debug!("Seeking from {:.2}s to remote {:.2}s", position, target);
            self.player.seek(target, SeekTolerance::ZERO);
        }
    }

    fn toggle_play_pause(&mut self) {
        if self.state.selected_path.is_none() {
            debug!("Toggle ignored, nothing loaded");
            return;
        }

        if self.player.is_playing() {
            self.player.pause();
        } else {
            self.player.play();
        }
    }

    /// Periodic tick: tell peers where we are while playing
    fn broadcast_clock(&self) {
        let Some(channel) = &self.channel else {
            return;
        };
        if !self.player.is_playing() {
            return;
        }

        let seconds = self.player.position();
        if !seconds.is_finite() {
            debug!("Skipping clock broadcast, position is {}", seconds);
            return;
        }

        let payload = match SyncMessage::from(PlaybackClockSample { seconds }).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error encoding time update: {}", e);
                return;
            }
        };
        let send = channel.send(payload);
        tokio::spawn(async move {
            // The next tick retries with a fresh position
            if let Err(e) = send.await {
                warn!("Error sending time update: {}", e);
            }
        });
    }

    fn share_file(&self, file: FileDescriptor) {
        let Some(channel) = &self.channel else {
            return;
        };

        let filename = file.filename.clone();
        let payload = match SyncMessage::from(file).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Error encoding file info: {}", e);
                return;
            }
        };
        let send = channel.send(payload);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            match send.await {
                Ok(()) => debug!("Shared file info for {}", filename),
                Err(e) => {
                    warn!("Failed to share file info: {}", e);
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx.send(Command::SetNotice(Notice::ShareFailed(e.to_string())));
                    }
                }
            }
        });
    }
}

/// Receive loop for one message kind.
///
/// Payloads that don't decode, or decode to another kind, are skipped.
async fn listen<F>(
    kind: &'static str,
    mut inbound: broadcast::Receiver<Vec<u8>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    select: F,
) where
    F: Fn(SyncMessage) -> Option<Command> + Send + 'static,
{
    debug!("Listening for {} messages", kind);
    loop {
        let payload = match inbound.recv().await {
            Ok(payload) => payload,
            Err(RecvError::Lagged(skipped)) => {
                warn!("{} listener skipped {} messages", kind, skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let command = match SyncMessage::decode(&payload) {
            Ok(message) => select(message),
            Err(e) => {
                debug!("{} listener ignoring payload: {}", kind, e);
                None
            }
        };

        if let Some(command) = command {
            let Some(tx) = commands.upgrade() else {
                break;
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    }
    debug!("{} listener ended", kind);
}

/// Cloneable handle to a running [`SyncCoordinator`]
#[derive(Clone)]
pub struct CoordinatorHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<SyncSnapshot>,
    probe: Arc<dyn MediaProbe>,
    prefix_len: usize,
}

impl CoordinatorHandle {
    fn send(&self, cmd: Command) -> Result<(), CoordinatorError> {
        self.command_tx
            .send(cmd)
            .map_err(|_| CoordinatorError::Stopped)
    }

    /// Start exchanging sync messages over `channel`.
    ///
    /// The first attach decides the session role; later attaches only swap
    /// the channel.
    pub fn attach_session(
        &self,
        channel: Arc<dyn SessionChannel>,
        role: SessionRole,
    ) -> Result<(), CoordinatorError> {
        self.send(Command::AttachSession { channel, role })
    }

    /// Fingerprint `path`, load it, and tell peers about it.
    ///
    /// On failure the error also becomes the current notice and nothing else
    /// changes.
    pub async fn select_local_file(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<FileDescriptor, CoordinatorError> {
        let path = path.into();
        let probe = Arc::clone(&self.probe);
        let prefix_len = self.prefix_len;
        let analysis_path = path.clone();

        let result = tokio::task::spawn_blocking(move || {
            fingerprint::analyze(&analysis_path, probe.as_ref(), prefix_len)
        })
        .await
        .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e.to_string()).into()));

        match result {
            Ok(file) => {
                self.send(Command::LocalFileAnalyzed {
                    path,
                    file: file.clone(),
                })?;
                Ok(file)
            }
            Err(e) => {
                warn!("Failed to analyze {}: {}", path.display(), e);
                self.send(Command::SetNotice(Notice::AnalysisFailed(e.to_string())))?;
                Err(e.into())
            }
        }
    }

    pub fn toggle_play_pause(&self) -> Result<(), CoordinatorError> {
        self.send(Command::TogglePlayPause)
    }

    /// Clear the current notice
    pub fn acknowledge_notice(&self) -> Result<(), CoordinatorError> {
        self.send(Command::AcknowledgeNotice)
    }

    /// Re-announce the local file to a participant who just arrived.
    ///
    /// Transports that report joins call this so late participants learn
    /// which file we picked.
    pub fn peer_joined(&self) -> Result<(), CoordinatorError> {
        self.send(Command::PeerJoined)
    }

    /// Surface a failure to start or join a session
    pub fn report_session_failure(&self, reason: impl Into<String>) -> Result<(), CoordinatorError> {
        self.send(Command::SetNotice(Notice::SessionFailed(reason.into())))
    }

    /// State after every previously issued command has been applied
    pub async fn snapshot(&self) -> Result<SyncSnapshot, CoordinatorError> {
        let (reply, result) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        result.await.map_err(|_| CoordinatorError::Stopped)
    }

    /// Follow state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the coordinator and its receive loops
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{MemoryChannel, MemoryHub};
    use crate::player::{mp4_fixtures, FakePlayer, IsoBmffProbe};
    use std::path::Path;
    use tempfile::TempDir;

    fn write_movie(dir: &TempDir, name: &str, duration_secs: u32) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, mp4_fixtures::minimal_mp4(1_000, duration_secs * 1_000)).unwrap();
        path
    }

    fn start() -> (CoordinatorHandle, Arc<FakePlayer>) {
        let player = Arc::new(FakePlayer::new());
        let handle = SyncCoordinator::spawn(
            player.clone(),
            Arc::new(IsoBmffProbe),
            CoordinatorConfig::default(),
        );
        (handle, player)
    }

    async fn wait_for(handle: &CoordinatorHandle, pred: impl FnMut(&SyncSnapshot) -> bool) -> SyncSnapshot {
        let mut rx = handle.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for state")
            .expect("coordinator stopped")
            .clone();
        snapshot
    }

    async fn wait_until(mut pred: impl FnMut() -> bool) {
        for _ in 0..500 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Next payload of the given kind from `rx`
    async fn next_message(
        rx: &mut broadcast::Receiver<Vec<u8>>,
        mut pred: impl FnMut(&SyncMessage) -> bool,
    ) -> SyncMessage {
        loop {
            let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for message")
                .unwrap();
            let message = SyncMessage::decode(&payload).unwrap();
            if pred(&message) {
                return message;
            }
        }
    }

    async fn peer_file(path: &Path) -> FileDescriptor {
        FileDescriptor::from_path(path, &IsoBmffProbe).unwrap()
    }

    async fn send_as_peer(peer: &MemoryChannel, message: SyncMessage) {
        peer.send(message.encode().unwrap()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_clock_seek_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 120);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let (handle, player) = start();

        handle.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();
        handle.select_local_file(&movie).await.unwrap();
        handle.snapshot().await.unwrap();
        player.set_position(10.0);

        // 1.5s ahead stays put, 4s ahead seeks; both arrive on the same loop in order
        send_as_peer(&peer, PlaybackClockSample { seconds: 11.5 }.into()).await;
        send_as_peer(&peer, PlaybackClockSample { seconds: 14.0 }.into()).await;

        wait_until(|| !player.seeks().is_empty()).await;
        assert_eq!(player.seeks(), vec![(14.0, SeekTolerance::ZERO)]);
        assert_eq!(player.position(), 14.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_clock_payload_seeks() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 120);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let (handle, player) = start();

        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        handle.select_local_file(&movie).await.unwrap();
        handle.snapshot().await.unwrap();

        peer.send(br#"{"seconds": 42.0}"#.to_vec()).await.unwrap();
        wait_until(|| !player.seeks().is_empty()).await;
        assert_eq!(player.position(), 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_ignored_without_file() {
        let hub = MemoryHub::new();
        let peer = hub.join();
        let (handle, player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();
        handle.snapshot().await.unwrap();

        send_as_peer(&peer, PlaybackClockSample { seconds: 50.0 }.into()).await;
        send_as_peer(&peer, SyncMessage::File(FileDescriptor {
            filename: "marker.mov".to_string(),
            content_digest: "abc".to_string(),
            file_size: 1,
            duration_seconds: 1.0,
        }))
        .await;

        wait_for(&handle, |s| s.remote_file.is_some()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(player.seeks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_file_before_local_selection() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 120);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let (handle, _player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();
        handle.snapshot().await.unwrap();

        // Same content under a different name
        let mut remote = peer_file(&movie).await;
        remote.filename = "their-copy.mp4".to_string();
        send_as_peer(&peer, SyncMessage::File(remote)).await;

        let snapshot = wait_for(&handle, |s| s.remote_file.is_some()).await;
        assert!(!snapshot.files_match);
        assert_eq!(
            snapshot.notice,
            Some(Notice::SelectRemoteFile {
                filename: "their-copy.mp4".to_string()
            })
        );

        handle.select_local_file(&movie).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.files_match);
        assert_eq!(snapshot.notice, None);
        assert_eq!(snapshot.selected_path.as_deref(), Some(movie.as_path()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_remote_files() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 100);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let (handle, _player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        let local = handle.select_local_file(&movie).await.unwrap();

        let similar = FileDescriptor {
            filename: "reencode.mp4".to_string(),
            content_digest: "xyz".to_string(),
            file_size: 1,
            duration_seconds: local.duration_seconds + 0.4,
        };
        send_as_peer(&peer, SyncMessage::File(similar)).await;
        let snapshot = wait_for(&handle, |s| s.notice == Some(Notice::SimilarFiles)).await;
        assert!(!snapshot.files_match);

        let different = FileDescriptor {
            filename: "other.mp4".to_string(),
            content_digest: "xyz".to_string(),
            file_size: 1,
            duration_seconds: 150.0,
        };
        send_as_peer(&peer, SyncMessage::File(different)).await;
        let snapshot =
            wait_for(&handle, |s| matches!(s.notice, Some(Notice::DifferentFiles { .. }))).await;
        assert!(!snapshot.files_match);
        assert_eq!(
            snapshot.notice,
            Some(Notice::DifferentFiles {
                local: "movie.mp4".to_string(),
                remote: "other.mp4".to_string()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_analysis_failure_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, player) = start();

        let result = handle.select_local_file(dir.path().join("missing.mov")).await;
        assert!(matches!(result, Err(CoordinatorError::FileAnalysis(_))));

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.local_file.is_none());
        assert!(snapshot.selected_path.is_none());
        assert!(matches!(snapshot.notice, Some(Notice::AnalysisFailed(_))));
        assert!(player.loaded().is_none());

        handle.acknowledge_notice().unwrap();
        assert_eq!(handle.snapshot().await.unwrap().notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_is_shared_with_peers() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 60);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let mut peer_rx = peer.subscribe();
        let (handle, player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();

        let local = handle.select_local_file(&movie).await.unwrap();
        let shared = next_message(&mut peer_rx, |m| matches!(m, SyncMessage::File(_))).await;
        assert_eq!(shared, SyncMessage::File(local));
        assert_eq!(player.loaded(), Some(movie));
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_announced_on_late_attach() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 60);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let mut peer_rx = peer.subscribe();
        let (handle, _player) = start();

        let local = handle.select_local_file(&movie).await.unwrap();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();

        let shared = next_message(&mut peer_rx, |m| matches!(m, SyncMessage::File(_))).await;
        assert_eq!(shared, SyncMessage::File(local));
    }

    #[tokio::test(start_paused = true)]
    async fn test_share_failure_sets_notice() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 60);
        let hub = MemoryHub::new();
        let channel = Arc::new(hub.join());
        let (handle, player) = start();
        handle.attach_session(channel.clone(), SessionRole::Hosting).unwrap();
        channel.leave();

        handle.select_local_file(&movie).await.unwrap();
        let snapshot = wait_for(&handle, |s| s.notice.is_some()).await;
        assert!(matches!(snapshot.notice, Some(Notice::ShareFailed(_))));
        // Local selection still stands
        assert!(snapshot.local_file.is_some());
        assert_eq!(player.loaded(), Some(movie));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_broadcast_only_while_playing() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 60);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let mut peer_rx = peer.subscribe();
        let (handle, player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        handle.select_local_file(&movie).await.unwrap();
        handle.snapshot().await.unwrap();
        player.set_position(5.0);

        handle.toggle_play_pause().unwrap();
        assert!(handle.snapshot().await.unwrap().is_playing);

        let clock = next_message(&mut peer_rx, |m| m.as_clock().is_some()).await;
        assert_eq!(clock, SyncMessage::Clock(PlaybackClockSample { seconds: 5.0 }));

        handle.toggle_play_pause().unwrap();
        assert!(!handle.snapshot().await.unwrap().is_playing);
        while peer_rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_send_failure_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 60);
        let hub = MemoryHub::new();
        let _peer = hub.join();
        let channel = Arc::new(hub.join());
        let (handle, _player) = start();
        handle.attach_session(channel.clone(), SessionRole::Hosting).unwrap();
        handle.select_local_file(&movie).await.unwrap();
        handle.toggle_play_pause().unwrap();
        handle.snapshot().await.unwrap();

        channel.leave();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.is_playing);
        assert_eq!(snapshot.notice, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_without_file_is_ignored() {
        let (handle, player) = start();
        handle.toggle_play_pause().unwrap();
        assert!(!handle.snapshot().await.unwrap().is_playing);
        assert!(!player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_keeps_first_role() {
        let hub = MemoryHub::new();
        let (handle, _player) = start();
        assert_eq!(handle.snapshot().await.unwrap().role, SessionRole::Idle);

        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.role, SessionRole::Hosting);
        assert!(snapshot.has_session);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_participants_converge() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 120);
        let hub = MemoryHub::new();

        let (host, host_player) = start();
        let (guest, guest_player) = start();
        host.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        guest.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();

        host.select_local_file(&movie).await.unwrap();
        guest.select_local_file(&movie).await.unwrap();

        let host_state = wait_for(&host, |s| s.files_match).await;
        let guest_state = wait_for(&guest, |s| s.files_match).await;
        assert_eq!(host_state.notice, None);
        assert_eq!(guest_state.notice, None);

        host_player.set_position(30.0);
        host.toggle_play_pause().unwrap();

        wait_until(|| guest_player.position() == 30.0).await;
        assert_eq!(guest_player.seeks(), vec![(30.0, SeekTolerance::ZERO)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_guest_learns_host_file() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 120);
        let hub = MemoryHub::new();

        let (host, _host_player) = start();
        let (guest, _guest_player) = start();
        host.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        host.select_local_file(&movie).await.unwrap();
        host.snapshot().await.unwrap();

        guest.attach_session(Arc::new(hub.join()), SessionRole::Joined).unwrap();
        guest.snapshot().await.unwrap();
        host.peer_joined().unwrap();

        let guest_state = wait_for(&guest, |s| s.remote_file.is_some()).await;
        assert_eq!(
            guest_state.notice,
            Some(Notice::SelectRemoteFile {
                filename: "movie.mp4".to_string()
            })
        );

        guest.select_local_file(&movie).await.unwrap();
        let guest_state = wait_for(&guest, |s| s.files_match).await;
        assert_eq!(guest_state.notice, None);
        assert!(wait_for(&host, |s| s.files_match).await.files_match);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_joined_without_file_sends_nothing() {
        let hub = MemoryHub::new();
        let peer = hub.join();
        let mut peer_rx = peer.subscribe();
        let (handle, _player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();

        handle.peer_joined().unwrap();
        handle.snapshot().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_finite_position_not_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let movie = write_movie(&dir, "movie.mp4", 60);
        let hub = MemoryHub::new();
        let peer = hub.join();
        let mut peer_rx = peer.subscribe();
        let (handle, player) = start();
        handle.attach_session(Arc::new(hub.join()), SessionRole::Hosting).unwrap();
        handle.select_local_file(&movie).await.unwrap();
        next_message(&mut peer_rx, |m| matches!(m, SyncMessage::File(_))).await;

        player.set_position(f64::NAN);
        handle.toggle_play_pause().unwrap();
        assert!(handle.snapshot().await.unwrap().is_playing);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(peer_rx.try_recv().is_err());

        player.set_position(8.0);
        let clock = next_message(&mut peer_rx, |m| m.as_clock().is_some()).await;
        assert_eq!(clock, SyncMessage::Clock(PlaybackClockSample { seconds: 8.0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_coordinator() {
        let (handle, _player) = start();
        handle.shutdown();
        wait_until(|| handle.command_tx.is_closed()).await;
        assert!(matches!(handle.snapshot().await, Err(CoordinatorError::Stopped)));
    }
}
