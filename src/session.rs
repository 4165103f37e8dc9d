//! Streaming session client for the live-transcription service.
//!
//! One task owns the transport, both timers, and the reconnection counter;
//! the rest of the system talks to it through a command channel and receives
//! transcript/error events over a single FIFO event channel. Reconnection is
//! deliberately bounded: the service is metered, so beyond the retry budget
//! the client escalates to the consumer instead of retrying forever.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::audio::AudioFrame;
use crate::audio::encode;
use crate::protocol::{self, ServerEvent, TranscriptEvent};
use crate::transport::{ABNORMAL_CLOSE_CODE, Transport, TransportLink, TransportMessage};

/// WebSocket close code for an orderly shutdown.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

const COMMAND_QUEUE_CAPACITY: usize = 64;
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Session client configuration, supplied at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Listen endpoint, without query parameters.
    pub url: String,
    /// Credential, carried as a connection subprotocol. Validated eagerly.
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub endpointing_ms: u32,
    pub sample_rate: u32,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Close codes that are never retried (e.g. authentication failures,
    /// if the deployment wants them terminal). Empty by default: all
    /// abnormal closes go through the bounded reconnect path.
    pub non_retryable_close_codes: Vec<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: String::new(),
            model: "nova-3".to_string(),
            language: "en-US".to_string(),
            endpointing_ms: 300,
            sample_rate: 16000,
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 3,
            non_retryable_close_codes: Vec::new(),
        }
    }
}

/// Observable session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Error classification. The message attached to each kind is a fixed
/// template, part of the user-facing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigurationMissing,
    ConnectFailed,
    TransportError,
    ServiceReported,
    RetriesExhausted,
}

#[derive(Debug, Clone)]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl SessionError {
    pub fn configuration_missing() -> Self {
        Self {
            kind: ErrorKind::ConfigurationMissing,
            message: "Deepgram API key is missing. Check your configuration.".to_string(),
            recoverable: false,
        }
    }

    pub fn connect_timeout() -> Self {
        Self {
            kind: ErrorKind::ConnectFailed,
            message: "Deepgram connection timeout. Please check your internet connection."
                .to_string(),
            recoverable: true,
        }
    }

    pub fn connect_failed() -> Self {
        Self {
            kind: ErrorKind::ConnectFailed,
            message: "Failed to connect to Deepgram. Check API key and internet connection."
                .to_string(),
            recoverable: true,
        }
    }

    pub fn transport_error(attempt: u32, max: u32) -> Self {
        Self {
            kind: ErrorKind::TransportError,
            message: format!("Connection lost. Reconnecting ({}/{})...", attempt, max),
            recoverable: true,
        }
    }

    pub fn non_retryable_close(code: u16) -> Self {
        Self {
            kind: ErrorKind::TransportError,
            message: format!("Connection closed with non-retryable code {}.", code),
            recoverable: false,
        }
    }

    pub fn service_reported(detail: &str) -> Self {
        Self {
            kind: ErrorKind::ServiceReported,
            message: format!("Transcription error: {}", detail),
            recoverable: true,
        }
    }

    pub fn retries_exhausted() -> Self {
        Self {
            kind: ErrorKind::RetriesExhausted,
            message: "Lost connection to transcription service. Please restart the session."
                .to_string(),
            recoverable: false,
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SessionError {}

/// Events delivered to the consumer, in strict arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transcript(TranscriptEvent),
    Error(SessionError),
}

enum SessionCommand {
    SendFrame(AudioFrame),
    Disconnect,
}

/// Handle to a running session task.
///
/// Dropping the handle closes the command channel, which the task treats
/// exactly like [`SessionClient::disconnect`]: the connection is closed
/// with code 1000 and the session ends.
pub struct SessionClient {
    cmd_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionState>,
}

impl SessionClient {
    /// Validate the configuration and spawn the session task.
    ///
    /// Fails immediately, without any connection attempt, when the
    /// credential is absent.
    pub fn spawn(
        config: SessionConfig,
        transport: Box<dyn Transport>,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), SessionError> {
        if config.api_key.trim().is_empty() {
            return Err(SessionError::configuration_missing());
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let task = SessionTask {
            config,
            transport,
            cmd_rx,
            event_tx,
            state_tx,
            reconnect_attempts: 0,
        };
        tokio::spawn(task.run());

        Ok((Self { cmd_tx, state_rx }, event_rx))
    }

    /// Forward one audio frame. Frames sent while the session is not open
    /// are dropped with a warning; they are never queued across reconnects.
    pub async fn send(&self, frame: AudioFrame) {
        if self
            .cmd_tx
            .send(SessionCommand::SendFrame(frame))
            .await
            .is_err()
        {
            log::warn!("Dropping audio frame: session is closed");
        }
    }

    /// Orderly shutdown. Idempotent and callable from any state, including
    /// while a connection attempt is still in flight.
    pub async fn disconnect(&self) {
        // Once the task has exited the command has nowhere to go, which is
        // exactly the idempotent behavior wanted here.
        let _ = self.cmd_tx.send(SessionCommand::Disconnect).await;
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Wait until the session reaches `target`. Returns early if the task
    /// exits first with the state already matching.
    pub async fn wait_until(&mut self, target: SessionState) {
        let _ = self.state_rx.wait_for(|s| *s == target).await;
    }
}

enum ConnectOutcome {
    Opened(Box<dyn TransportLink>),
    Failed(SessionError),
    ManualStop,
}

#[derive(Debug, PartialEq, Eq)]
enum CloseAction {
    Reconnect,
    Terminal,
}

struct SessionTask {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
    reconnect_attempts: u32,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            let _ = self.state_tx.send(SessionState::Connecting);

            let outcome = {
                // Connect with a bounded timeout, while still draining
                // commands: frames arriving before the session is open are
                // dropped, and a disconnect must be able to interrupt the
                // attempt. Dropping the future cancels both the attempt and
                // its timeout timer.
                let connect_fut = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.transport.connect(&self.config),
                );
                tokio::pin!(connect_fut);
                loop {
                    tokio::select! {
                        res = &mut connect_fut => {
                            break match res {
                                Ok(Ok(link)) => ConnectOutcome::Opened(link),
                                Ok(Err(e)) => {
                                    log::error!("Connection failed: {}", e);
                                    ConnectOutcome::Failed(SessionError::connect_failed())
                                }
                                Err(_) => {
                                    log::error!(
                                        "Connection timed out after {:?}",
                                        self.config.connect_timeout
                                    );
                                    ConnectOutcome::Failed(SessionError::connect_timeout())
                                }
                            };
                        }
                        cmd = self.cmd_rx.recv() => match cmd {
                            Some(SessionCommand::SendFrame(_)) => {
                                log::warn!("Dropping audio frame: session is not open");
                            }
                            Some(SessionCommand::Disconnect) | None => {
                                break ConnectOutcome::ManualStop;
                            }
                        }
                    }
                }
            };

            let mut link = match outcome {
                ConnectOutcome::Opened(link) => link,
                ConnectOutcome::Failed(err) => {
                    self.emit(SessionEvent::Error(err)).await;
                    // An open failure is handled like an abnormal close.
                    match self.handle_close(ABNORMAL_CLOSE_CODE).await {
                        CloseAction::Reconnect => continue,
                        CloseAction::Terminal => return self.finish(),
                    }
                }
                ConnectOutcome::ManualStop => return self.finish(),
            };

            let _ = self.state_tx.send(SessionState::Open);
            self.reconnect_attempts = 0;
            log::info!("Session open");

            let close_code = loop {
                tokio::select! {
                    msg = link.next() => match msg {
                        Some(TransportMessage::Text(text)) => self.handle_text(&text).await,
                        Some(TransportMessage::Closed { code }) => break code,
                        None => break ABNORMAL_CLOSE_CODE,
                    },
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(SessionCommand::SendFrame(frame)) => {
                            let bytes = encode::frame_to_bytes(&frame);
                            if let Err(e) = link.send_binary(bytes).await {
                                log::warn!("Failed to send audio frame: {}", e);
                            }
                        }
                        Some(SessionCommand::Disconnect) | None => {
                            let _ = link.close(NORMAL_CLOSE_CODE).await;
                            return self.finish();
                        }
                    }
                }
            };

            // Release the dead connection before deciding what happens next.
            drop(link);
            log::warn!("Connection closed (code {})", close_code);

            match self.handle_close(close_code).await {
                CloseAction::Reconnect => continue,
                CloseAction::Terminal => return self.finish(),
            }
        }
    }

    /// Decide what an (abnormal or normal) close means for the session.
    ///
    /// The attempt counter is incremented synchronously, before the delay,
    /// so an overlapping disconnect can never observe a stale count. The
    /// third consecutive failure is terminal: teardown is already complete
    /// at this point, so the fatal error is the last thing the consumer
    /// sees before the channel closes.
    async fn handle_close(&mut self, code: u16) -> CloseAction {
        if code == NORMAL_CLOSE_CODE {
            log::info!("Server closed the session normally");
            return CloseAction::Terminal;
        }
        if self.config.non_retryable_close_codes.contains(&code) {
            self.emit(SessionEvent::Error(SessionError::non_retryable_close(code)))
                .await;
            return CloseAction::Terminal;
        }

        self.reconnect_attempts += 1;
        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            log::error!("Max reconnection attempts reached");
            self.emit(SessionEvent::Error(SessionError::retries_exhausted()))
                .await;
            return CloseAction::Terminal;
        }

        self.emit(SessionEvent::Error(SessionError::transport_error(
            self.reconnect_attempts,
            self.config.max_reconnect_attempts,
        )))
        .await;
        let _ = self.state_tx.send(SessionState::Reconnecting);

        // Fixed backoff, still interruptible by a disconnect. Dropping the
        // sleep when this select resolves cancels the reconnect timer.
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => return CloseAction::Reconnect,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCommand::SendFrame(_)) => {
                        log::warn!("Dropping audio frame: session is not open");
                    }
                    Some(SessionCommand::Disconnect) | None => return CloseAction::Terminal,
                }
            }
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match protocol::parse_server_message(text) {
            Some(ServerEvent::Transcript(t)) => {
                self.emit(SessionEvent::Transcript(t)).await;
            }
            Some(ServerEvent::ServiceError(detail)) => {
                // The service may recover on its own; stay connected.
                log::error!("Service-reported error: {}", detail);
                self.emit(SessionEvent::Error(SessionError::service_reported(&detail)))
                    .await;
            }
            None => {}
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            log::debug!("Event receiver dropped");
        }
    }

    /// Terminal transition. Dropping the task drops the event sender, so no
    /// late event can reach a consumer that already saw Closed.
    fn finish(self) {
        let _ = self.state_tx.send(SessionState::Closed);
        log::info!("Session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::time::{Duration, Instant, sleep};

    enum Script {
        /// Connection succeeds; inbound traffic is scripted by the test
        /// through the paired sender.
        Open(mpsc::UnboundedReceiver<TransportMessage>),
        /// Connection attempt fails outright.
        Fail,
        /// Connection attempt never resolves (exercises the connect timeout).
        Hang,
    }

    #[derive(Clone, Default)]
    struct Recorded {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<Mutex<Vec<u16>>>,
        connects: Arc<AtomicUsize>,
    }

    impl Recorded {
        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
        fn closed(&self) -> Vec<u16> {
            self.closed.lock().unwrap().clone()
        }
    }

    struct MockTransport {
        scripts: Mutex<VecDeque<Script>>,
        recorded: Recorded,
    }

    impl MockTransport {
        fn new(scripts: Vec<Script>) -> (Box<Self>, Recorded) {
            let recorded = Recorded::default();
            let transport = Box::new(Self {
                scripts: Mutex::new(scripts.into()),
                recorded: recorded.clone(),
            });
            (transport, recorded)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(
            &mut self,
            _config: &SessionConfig,
        ) -> anyhow::Result<Box<dyn TransportLink>> {
            self.recorded.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(Script::Open(rx)) => Ok(Box::new(MockLink {
                    rx,
                    recorded: self.recorded.clone(),
                })),
                Some(Script::Fail) => anyhow::bail!("connection refused"),
                Some(Script::Hang) | None => futures_util::future::pending().await,
            }
        }
    }

    struct MockLink {
        rx: mpsc::UnboundedReceiver<TransportMessage>,
        recorded: Recorded,
    }

    #[async_trait]
    impl TransportLink for MockLink {
        async fn send_binary(&mut self, data: Vec<u8>) -> anyhow::Result<()> {
            self.recorded.sent.lock().unwrap().push(data);
            Ok(())
        }

        async fn close(&mut self, code: u16) -> anyhow::Result<()> {
            self.recorded.closed.lock().unwrap().push(code);
            Ok(())
        }

        async fn next(&mut self) -> Option<TransportMessage> {
            self.rx.recv().await
        }
    }

    fn open_script() -> (UnboundedSender<TransportMessage>, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Script::Open(rx))
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            api_key: "test-key".to_string(),
            ..SessionConfig::default()
        }
    }

    /// Let the session task catch up without disturbing pending timers.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn transcript_payload(text: &str, is_final: bool) -> TransportMessage {
        TransportMessage::Text(format!(
            r#"{{"channel":{{"alternatives":[{{"transcript":"{}"}}]}},"is_final":{}}}"#,
            text, is_final
        ))
    }

    #[tokio::test]
    async fn missing_credential_fails_without_connecting() {
        let (transport, recorded) = MockTransport::new(vec![]);
        let config = SessionConfig {
            api_key: "  ".to_string(),
            ..SessionConfig::default()
        };

        let err = match SessionClient::spawn(config, transport) {
            Err(err) => err,
            Ok(_) => panic!("spawn must fail without a credential"),
        };
        assert_eq!(err.kind, ErrorKind::ConfigurationMissing);
        assert!(!err.recoverable);
        assert!(err.message.contains("API key is missing"));
        assert_eq!(recorded.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interim_transcript_is_delivered_while_open() {
        let (server, script) = open_script();
        let (transport, _) = MockTransport::new(vec![script]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        server
            .send(transcript_payload("hello world", false))
            .unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Transcript(t) => {
                assert_eq!(t.text, "hello world");
                assert!(!t.is_final);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(client.state(), SessionState::Open);

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn service_error_is_nonfatal_and_session_stays_open() {
        let (server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        server
            .send(TransportMessage::Text(r#"{"error":"bad request"}"#.to_string()))
            .unwrap();

        match events.recv().await.unwrap() {
            SessionEvent::Error(e) => {
                assert_eq!(e.kind, ErrorKind::ServiceReported);
                assert!(e.recoverable);
                assert!(e.message.contains("bad request"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(client.state(), SessionState::Open);
        assert_eq!(recorded.connects(), 1);

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn normal_close_never_schedules_a_reconnect() {
        let (server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        server
            .send(TransportMessage::Closed {
                code: NORMAL_CLOSE_CODE,
            })
            .unwrap();
        client.wait_until(SessionState::Closed).await;

        // Give any (wrongly) armed timer every chance to fire.
        sleep(Duration::from_secs(30)).await;
        assert_eq!(recorded.connects(), 1);

        // No error events were produced for an orderly close.
        while let Some(event) = events.recv().await {
            panic!("unexpected event after normal close: {:?}", event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn third_consecutive_failure_is_terminal_with_one_fatal_error() {
        let (transport, recorded) =
            MockTransport::new(vec![Script::Fail, Script::Fail, Script::Fail]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Closed).await;
        assert_eq!(recorded.connects(), 3);

        let mut fatal = 0;
        while let Some(event) = events.recv().await {
            if let SessionEvent::Error(e) = event {
                if e.kind == ErrorKind::RetriesExhausted {
                    assert!(!e.recoverable);
                    assert!(e.message.contains("restart"));
                    fatal += 1;
                }
            }
        }
        assert_eq!(fatal, 1);

        // Terminal means terminal: nothing further fires.
        sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_close_increments_counter_before_the_delay() {
        let (server1, script1) = open_script();
        let (_server2, script2) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script1, script2]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        let closed_at = Instant::now();
        server1.send(TransportMessage::Closed { code: 1006 }).unwrap();

        // The attempt number is visible in the transient error, which is
        // emitted before the reconnect delay starts.
        match events.recv().await.unwrap() {
            SessionEvent::Error(e) => {
                assert_eq!(e.kind, ErrorKind::TransportError);
                assert!(e.recoverable);
                assert!(e.message.contains("(1/3)"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(closed_at.elapsed() < Duration::from_secs(2));
        assert_eq!(recorded.connects(), 1);

        // Exactly one reconnect fires, after the fixed delay.
        client.wait_until(SessionState::Reconnecting).await;
        client.wait_until(SessionState::Open).await;
        assert_eq!(recorded.connects(), 2);
        assert!(closed_at.elapsed() >= Duration::from_secs(2));

        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn frames_sent_while_not_open_never_reach_the_transport() {
        let (transport, recorded) = MockTransport::new(vec![Script::Hang]);
        let (mut client, _events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.send(vec![1, 2, 3]).await;
        client.send(vec![4, 5, 6]).await;
        settle().await;
        assert!(recorded.sent().is_empty());

        client.disconnect().await;
        client.wait_until(SessionState::Closed).await;
        assert!(recorded.sent().is_empty());

        // Late frames after close are dropped at the handle.
        client.send(vec![7, 8, 9]).await;
        assert!(recorded.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_sent_while_open_are_wire_encoded() {
        let (_server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, _events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        client.send(vec![0x0102, -2]).await;
        settle().await;

        assert_eq!(recorded.sent(), vec![vec![0x02, 0x01, 0xFE, 0xFF]]);
        client.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_closes_the_session() {
        let (_server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        drop(client);

        // The event channel ends once the task has finished.
        while let Some(event) = events.recv().await {
            panic!("unexpected event after handle drop: {:?}", event);
        }
        assert_eq!(recorded.closed(), vec![NORMAL_CLOSE_CODE]);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_can_be_driven_from_a_spawned_task() {
        let (_server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, _events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;

        // The handle (and the session task itself) must move freely across
        // runtime worker threads.
        let driver = tokio::spawn(async move {
            client.send(vec![1, 2]).await;
            client.disconnect().await;
            client.wait_until(SessionState::Closed).await;
        });
        driver.await.unwrap();

        assert_eq!(recorded.sent(), vec![vec![0x01, 0x00, 0x02, 0x00]]);
        assert_eq!(recorded.closed(), vec![NORMAL_CLOSE_CODE]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_from_open() {
        let (_server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, _events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        client.disconnect().await;
        client.disconnect().await;
        client.wait_until(SessionState::Closed).await;
        client.disconnect().await;

        assert_eq!(recorded.closed(), vec![NORMAL_CLOSE_CODE]);

        // No timer survives a manual disconnect.
        sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.connects(), 1);
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_interrupts_a_pending_connection_attempt() {
        let (transport, recorded) = MockTransport::new(vec![Script::Hang]);
        let (mut client, _events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        settle().await;
        client.disconnect().await;
        client.disconnect().await;
        client.wait_until(SessionState::Closed).await;

        sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.connects(), 1);
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_pending_reconnect_delay() {
        let (server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        server.send(TransportMessage::Closed { code: 1006 }).unwrap();

        // Wait for the transient error so the delay is armed, then cancel.
        match events.recv().await.unwrap() {
            SessionEvent::Error(e) => assert_eq!(e.kind, ErrorKind::TransportError),
            other => panic!("unexpected event: {:?}", other),
        }
        client.disconnect().await;
        client.wait_until(SessionState::Closed).await;

        sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_close_code_is_terminal() {
        let (server, script) = open_script();
        let (transport, recorded) = MockTransport::new(vec![script]);
        let config = SessionConfig {
            non_retryable_close_codes: vec![4001],
            ..test_config()
        };
        let (mut client, mut events) = SessionClient::spawn(config, transport).unwrap();

        client.wait_until(SessionState::Open).await;
        server.send(TransportMessage::Closed { code: 4001 }).unwrap();
        client.wait_until(SessionState::Closed).await;

        let mut saw_fatal_close = false;
        while let Some(event) = events.recv().await {
            if let SessionEvent::Error(e) = event {
                assert_ne!(e.kind, ErrorKind::RetriesExhausted);
                if e.message.contains("non-retryable code 4001") {
                    assert!(!e.recoverable);
                    saw_fatal_close = true;
                }
            }
        }
        assert!(saw_fatal_close);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(recorded.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_preserve_arrival_order() {
        let (server, script) = open_script();
        let (transport, _) = MockTransport::new(vec![script]);
        let (mut client, mut events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        server.send(transcript_payload("one", false)).unwrap();
        server.send(transcript_payload("one two", false)).unwrap();
        server
            .send(TransportMessage::Text(r#"{"error":"hiccup"}"#.to_string()))
            .unwrap();
        server.send(transcript_payload("one two three.", true)).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            match events.recv().await.unwrap() {
                SessionEvent::Transcript(t) => seen.push(t.text),
                SessionEvent::Error(e) => seen.push(format!("err:{}", e.kind_tag())),
            }
        }
        assert_eq!(
            seen,
            vec!["one", "one two", "err:ServiceReported", "one two three."]
        );

        client.disconnect().await;
    }

    impl SessionError {
        fn kind_tag(&self) -> &'static str {
            match self.kind {
                ErrorKind::ConfigurationMissing => "ConfigurationMissing",
                ErrorKind::ConnectFailed => "ConnectFailed",
                ErrorKind::TransportError => "TransportError",
                ErrorKind::ServiceReported => "ServiceReported",
                ErrorKind::RetriesExhausted => "RetriesExhausted",
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_resets_the_attempt_counter() {
        // Two failures, then a successful open: the counter sits at 2 and
        // resets to 0 on open. Without the reset, the abnormal close below
        // would be the third failure and terminal; with it, the session
        // rides out one more failed attempt and reopens.
        let (server, script) = open_script();
        let (_server2, script2) = open_script();
        let (transport, recorded) = MockTransport::new(vec![
            Script::Fail,
            Script::Fail,
            script,
            Script::Fail,
            script2,
        ]);
        let (mut client, _events) =
            SessionClient::spawn(test_config(), transport).unwrap();

        client.wait_until(SessionState::Open).await;
        assert_eq!(recorded.connects(), 3);

        server.send(TransportMessage::Closed { code: 1006 }).unwrap();
        client.wait_until(SessionState::Reconnecting).await;
        client.wait_until(SessionState::Open).await;
        assert_eq!(recorded.connects(), 5);

        client.disconnect().await;
    }
}
