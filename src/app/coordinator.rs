// SPDX-License-Identifier: GPL-3.0-only

//! Scan screen coordinator
//!
//! Owns the camera session and sampling loop for one scan screen, maps
//! the accepted decode into a borrow or return action against the
//! catalog, and emits screen events for the presentation layer. All
//! timers and async arms are guarded by a liveness flag so teardown can
//! race any of them safely.

use crate::app::state::{
    Intent, Navigation, ScanState, ScreenEvent, StatusMessage, UserSession,
};
use crate::backends::camera::{
    CameraBackend, CameraConstraints, CameraError, CameraFrame, CameraSession, pick_device,
};
use crate::catalog::{ApiError, Book, CatalogApi};
use crate::constants::{scan, ui};
use crate::scan::{FrameDecoder, ScanEvent, ScanLoop, ScanLoopHandle, ScanResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Timing and capture knobs for one scan screen.
///
/// Split out from `Config` so tests can shrink the delays.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Decode sampling rate (clamped by the loop)
    pub sample_rate_hz: u32,
    /// Capture constraints handed to the backend
    pub constraints: CameraConstraints,
    /// Remembered device path, if any
    pub preferred_camera: Option<String>,
    /// Auto-dismiss delay for non-persistent messages
    pub message_timeout: Duration,
    /// Pause between a confirmation and the navigation event
    pub navigation_delay: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            sample_rate_hz: scan::DEFAULT_SAMPLE_RATE_HZ,
            constraints: CameraConstraints::default(),
            preferred_camera: None,
            message_timeout: ui::MESSAGE_TIMEOUT,
            navigation_delay: ui::NAVIGATION_DELAY,
        }
    }
}

struct Inner {
    state: ScanState,
    session: Option<Arc<dyn CameraSession>>,
    loop_handle: Option<ScanLoopHandle>,
    last_detection: Option<ScanResult>,
    /// Sender handed to scan loops; taken on teardown so the event pump
    /// drains and exits once the last loop ends
    scan_events: Option<mpsc::UnboundedSender<ScanEvent>>,
}

/// Screen-level controller for the scan flow
pub struct ScanCoordinator<C: CatalogApi> {
    backend: Arc<dyn CameraBackend>,
    catalog: Arc<C>,
    decoder: Arc<dyn FrameDecoder>,
    user: Option<UserSession>,
    intent: Intent,
    settings: ScanSettings,
    events: mpsc::UnboundedSender<ScreenEvent>,
    inner: Arc<Mutex<Inner>>,
    alive: Arc<AtomicBool>,
    message_seq: Arc<AtomicU64>,
    timers: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl<C: CatalogApi> Clone for ScanCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            catalog: Arc::clone(&self.catalog),
            decoder: Arc::clone(&self.decoder),
            user: self.user.clone(),
            intent: self.intent,
            settings: self.settings.clone(),
            events: self.events.clone(),
            inner: Arc::clone(&self.inner),
            alive: Arc::clone(&self.alive),
            message_seq: Arc::clone(&self.message_seq),
            timers: Arc::clone(&self.timers),
        }
    }
}

/// How an action attempt failed
enum ActionFailure {
    /// Rejected locally before any network call
    Domain(String),
    /// The catalog call failed
    Api(ApiError),
}

impl ActionFailure {
    fn message(&self) -> String {
        match self {
            ActionFailure::Domain(msg) => msg.clone(),
            ActionFailure::Api(err) => err.user_message(),
        }
    }
}

struct ActionOutcome {
    book_id: u32,
    message: String,
}

impl<C: CatalogApi + 'static> ScanCoordinator<C> {
    /// Build a coordinator and its screen-event stream.
    ///
    /// Must be called inside a tokio runtime; the internal event pump is
    /// spawned here.
    pub fn new(
        backend: Arc<dyn CameraBackend>,
        catalog: Arc<C>,
        decoder: Arc<dyn FrameDecoder>,
        user: Option<UserSession>,
        intent: Intent,
        settings: ScanSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ScreenEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (scan_tx, mut scan_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            backend,
            catalog,
            decoder,
            user,
            intent,
            settings,
            events: events_tx,
            inner: Arc::new(Mutex::new(Inner {
                state: ScanState::Idle,
                session: None,
                loop_handle: None,
                last_detection: None,
                scan_events: Some(scan_tx),
            })),
            alive: Arc::new(AtomicBool::new(true)),
            message_seq: Arc::new(AtomicU64::new(0)),
            timers: Arc::new(Mutex::new(Vec::new())),
        };

        let pump = coordinator.clone();
        tokio::spawn(async move {
            while let Some(event) = scan_rx.recv().await {
                if !pump.is_alive() {
                    continue;
                }
                match event {
                    ScanEvent::Decoded(result) => pump.process(result).await,
                    ScanEvent::Failed(reason) => pump.on_loop_failure(reason).await,
                }
            }
        });

        (coordinator, events_rx)
    }

    /// Configured intent for this screen
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// The signed-in user, if any
    pub fn user(&self) -> Option<UserSession> {
        self.user.clone()
    }

    /// Current screen state
    pub fn state(&self) -> ScanState {
        self.inner.lock().unwrap().state.clone()
    }

    /// Latest camera frame for the preview, if a session is live
    pub fn preview_frame(&self) -> Option<Arc<CameraFrame>> {
        self.inner
            .lock()
            .unwrap()
            .session
            .as_ref()
            .and_then(|session| session.frame())
    }

    /// The accepted detection, for the overlay
    pub fn last_detection(&self) -> Option<ScanResult> {
        self.inner.lock().unwrap().last_detection.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ScreenEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ScanState) {
        self.inner.lock().unwrap().state = next.clone();
        self.emit(ScreenEvent::StateChanged(next));
    }

    /// Show a message, replacing the current one. Non-persistent messages
    /// are cleared by a timer unless a newer message superseded them.
    fn show_message(&self, message: StatusMessage) {
        let seq = self.message_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(ScreenEvent::Message(message.clone()));
        if message.persistent {
            return;
        }

        let coordinator = self.clone();
        let timeout = self.settings.message_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !coordinator.is_alive() {
                return;
            }
            // Only clear if no newer message replaced this one
            if coordinator.message_seq.load(Ordering::SeqCst) == seq {
                coordinator.emit(ScreenEvent::MessageCleared);
            }
        });

        let mut timers = self.timers.lock().unwrap();
        timers.retain(|t| !t.is_finished());
        timers.push(timer);
    }

    /// Start (or restart) scanning.
    ///
    /// A no-op while a start, scan, or action is already in progress: the
    /// camera is an exclusive resource and a second acquisition is never
    /// queued. Every failure path lands in `Error` with a message.
    pub async fn start(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state.is_busy() {
                debug!(state = ?inner.state, "Start ignored, scan already in progress");
                return;
            }
            inner.state = ScanState::Starting;
            inner.last_detection = None;
        }
        self.emit(ScreenEvent::StateChanged(ScanState::Starting));

        let backend = Arc::clone(&self.backend);
        let constraints = self.settings.constraints.clone();
        let preferred = self.settings.preferred_camera.clone();
        let opened = tokio::task::spawn_blocking(move || {
            let devices = backend.list_devices()?;
            let device = pick_device(&devices, &constraints, preferred.as_deref())
                .ok_or(CameraError::NoDeviceFound)?
                .clone();
            info!(device = %device.path, label = %device.label, "Opening camera");
            backend.open(&device, &constraints)
        })
        .await;

        let session = match opened {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => {
                warn!(error = %err, "Camera start failed");
                if self.is_alive() {
                    self.set_state(ScanState::Error(err.to_string()));
                    self.show_message(StatusMessage::error(format!(
                        "Camera unavailable: {}",
                        err
                    )));
                }
                return;
            }
            Err(join_err) => {
                warn!(error = %join_err, "Camera start task failed");
                if self.is_alive() {
                    self.set_state(ScanState::Error("camera start failed".to_string()));
                }
                return;
            }
        };

        // The screen may have been torn down while the device was being
        // acquired; in that case only release what was just opened.
        let started = {
            let mut inner = self.inner.lock().unwrap();
            if !self.is_alive() || inner.scan_events.is_none() {
                false
            } else {
                let scan_events = inner.scan_events.as_ref().unwrap().clone();
                let handle = ScanLoop::spawn(
                    Arc::clone(&session),
                    Arc::clone(&self.decoder),
                    self.settings.sample_rate_hz,
                    scan_events,
                );
                inner.session = Some(Arc::clone(&session));
                inner.loop_handle = Some(handle);
                inner.state = ScanState::Scanning;
                true
            }
        };

        if started {
            self.emit(ScreenEvent::StateChanged(ScanState::Scanning));
        } else {
            session.stop();
        }
    }

    /// Stop the loop and release the camera, off the async threads
    async fn release_camera(&self) {
        let (handle, session) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.loop_handle.take(), inner.session.take())
        };
        if let Some(handle) = handle {
            handle.stop();
        }
        if let Some(session) = session {
            let _ = tokio::task::spawn_blocking(move || session.stop()).await;
        }
    }

    /// The circuit breaker fired: release the camera, surface the error
    async fn on_loop_failure(&self, reason: String) {
        warn!(reason = %reason, "Scan loop failed");
        self.release_camera().await;
        if !self.is_alive() {
            return;
        }
        self.set_state(ScanState::Error(reason.clone()));
        self.show_message(StatusMessage::error(format!("Scanning stopped: {}", reason)));
    }

    /// Drive the accepted decode through resolution and the configured
    /// action. Resource release strictly precedes network I/O.
    async fn process(&self, result: ScanResult) {
        info!(payload = %result.text, "Processing scan result");
        self.release_camera().await;
        if !self.is_alive() {
            return;
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_detection = Some(result.clone());
            inner.state = ScanState::Processing;
        }
        self.emit(ScreenEvent::Detection(result.clone()));
        self.emit(ScreenEvent::StateChanged(ScanState::Processing));

        match self.apply_action(result.text.trim()).await {
            Ok(outcome) => {
                if !self.is_alive() {
                    return;
                }
                self.show_message(StatusMessage::confirmation(outcome.message));
                self.set_state(ScanState::NavigatingAway);
                self.schedule_navigation(Navigation::BookDetail {
                    book_id: outcome.book_id,
                });
            }
            Err(failure) => {
                if !self.is_alive() {
                    return;
                }
                self.show_message(StatusMessage::error(failure.message()));
                // The camera stays stopped; the user restarts explicitly
                self.set_state(ScanState::Idle);
            }
        }
    }

    /// Resolve the payload against the catalog and run the intent branch
    async fn apply_action(&self, payload: &str) -> Result<ActionOutcome, ActionFailure> {
        let books = self
            .catalog
            .list_books()
            .await
            .map_err(ActionFailure::Api)?;
        let book: Book = books
            .iter()
            .find(|b| b.isbn == payload)
            .cloned()
            .ok_or_else(|| {
                ActionFailure::Domain("No catalog entry matches the scanned code".to_string())
            })?;
        debug!(book_id = book.id, title = %book.title, "Resolved scanned code");

        let user = self.user.clone().ok_or_else(|| {
            ActionFailure::Domain(format!("Sign in before you {} a book", self.intent.verb()))
        })?;

        match self.intent {
            Intent::Borrow => {
                if book.is_borrowed {
                    return Err(ActionFailure::Domain(format!(
                        "\"{}\" is already on loan",
                        book.title
                    )));
                }
                let message = self
                    .catalog
                    .borrow_book(book.id, user.user_id)
                    .await
                    .map_err(ActionFailure::Api)?;
                Ok(ActionOutcome {
                    book_id: book.id,
                    message: message_or(message, format!("\"{}\" borrowed", book.title)),
                })
            }
            Intent::Return => {
                let home = self
                    .catalog
                    .user_home(user.user_id)
                    .await
                    .map_err(ActionFailure::Api)?;
                // The catalog keys open records by title; user_home
                // carries no book id to match on.
                let record = home
                    .borrowed_books
                    .iter()
                    .find(|r| r.book_title == book.title && r.is_open())
                    .ok_or_else(|| {
                        ActionFailure::Domain(format!(
                            "No open borrow record for \"{}\"",
                            book.title
                        ))
                    })?;
                let message = self
                    .catalog
                    .return_book(record.id)
                    .await
                    .map_err(ActionFailure::Api)?;
                Ok(ActionOutcome {
                    book_id: book.id,
                    message: message_or(message, format!("\"{}\" returned", book.title)),
                })
            }
        }
    }

    /// Emit the navigation event after the observation delay
    fn schedule_navigation(&self, navigation: Navigation) {
        let coordinator = self.clone();
        let delay = self.settings.navigation_delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if coordinator.is_alive() {
                coordinator.emit(ScreenEvent::Navigate(navigation));
            }
        });
        self.timers.lock().unwrap().push(timer);
    }

    /// Tear the screen down: stop sampling, release the camera, cancel
    /// every scheduled timer. Idempotent; safe to race with `start`.
    pub fn teardown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            info!("Scan screen teardown");
        }
        let (handle, session) = {
            let mut inner = self.inner.lock().unwrap();
            inner.scan_events = None;
            (inner.loop_handle.take(), inner.session.take())
        };
        if let Some(handle) = handle {
            handle.stop();
        }
        if let Some(session) = session {
            session.stop();
        }
        for timer in self.timers.lock().unwrap().drain(..) {
            timer.abort();
        }
    }
}

/// Prefer the server's text; fall back when the envelope was empty
fn message_or(message: String, fallback: String) -> String {
    if message.is_empty() { fallback } else { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{CameraDevice, CameraResult, Facing};
    use crate::catalog::{ApiResult, BorrowRecord, UserHome};
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    // ===== Fakes =====

    struct FakeSession {
        device: CameraDevice,
        frame: Arc<CameraFrame>,
        stopped: AtomicBool,
    }

    impl CameraSession for FakeSession {
        fn device(&self) -> &CameraDevice {
            &self.device
        }
        fn frame(&self) -> Option<Arc<CameraFrame>> {
            Some(Arc::clone(&self.frame))
        }
        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn is_stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    struct FakeBackend {
        fail_open: Option<CameraError>,
        gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
        sessions: Mutex<Vec<Arc<FakeSession>>>,
        open_count: AtomicU32,
    }

    impl FakeBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail_open: None,
                gate: Mutex::new(None),
                sessions: Mutex::new(Vec::new()),
                open_count: AtomicU32::new(0),
            })
        }

        fn failing(err: CameraError) -> Arc<Self> {
            Arc::new(Self {
                fail_open: Some(err),
                gate: Mutex::new(None),
                sessions: Mutex::new(Vec::new()),
                open_count: AtomicU32::new(0),
            })
        }

        /// Backend whose `open` blocks until the returned sender fires
        fn gated() -> (Arc<Self>, std::sync::mpsc::Sender<()>) {
            let (tx, rx) = std::sync::mpsc::channel();
            let backend = Arc::new(Self {
                fail_open: None,
                gate: Mutex::new(Some(rx)),
                sessions: Mutex::new(Vec::new()),
                open_count: AtomicU32::new(0),
            });
            (backend, tx)
        }

        fn opened(&self) -> u32 {
            self.open_count.load(Ordering::SeqCst)
        }

        fn sessions(&self) -> Vec<Arc<FakeSession>> {
            self.sessions.lock().unwrap().clone()
        }
    }

    impl CameraBackend for FakeBackend {
        fn list_devices(&self) -> CameraResult<Vec<CameraDevice>> {
            Ok(vec![CameraDevice {
                path: "test:fake".to_string(),
                label: "Fake Camera".to_string(),
                facing: Facing::Unknown,
            }])
        }

        fn open(
            &self,
            device: &CameraDevice,
            _constraints: &CameraConstraints,
        ) -> CameraResult<Arc<dyn CameraSession>> {
            if let Some(gate) = self.gate.lock().unwrap().take() {
                let _ = gate.recv_timeout(Duration::from_secs(5));
            }
            if let Some(err) = &self.fail_open {
                return Err(err.clone());
            }
            self.open_count.fetch_add(1, Ordering::SeqCst);
            let session = Arc::new(FakeSession {
                device: device.clone(),
                frame: Arc::new(CameraFrame::from_rgba(4, 4, vec![200; 64])),
                stopped: AtomicBool::new(false),
            });
            self.sessions.lock().unwrap().push(Arc::clone(&session));
            Ok(session)
        }
    }

    struct FakeCatalog {
        books: Vec<Book>,
        home: UserHome,
        borrow_result: ApiResult<String>,
        return_result: ApiResult<String>,
        borrow_calls: Mutex<Vec<(u32, u32)>>,
        return_calls: Mutex<Vec<u32>>,
    }

    impl FakeCatalog {
        fn with_books(books: Vec<Book>) -> Arc<Self> {
            Arc::new(Self {
                books,
                home: UserHome::default(),
                borrow_result: Ok("borrowed, due in 60 days".to_string()),
                return_result: Ok("returned".to_string()),
                borrow_calls: Mutex::new(Vec::new()),
                return_calls: Mutex::new(Vec::new()),
            })
        }

        fn with_home(books: Vec<Book>, home: UserHome) -> Arc<Self> {
            Arc::new(Self {
                books,
                home,
                borrow_result: Ok("borrowed".to_string()),
                return_result: Ok("returned".to_string()),
                borrow_calls: Mutex::new(Vec::new()),
                return_calls: Mutex::new(Vec::new()),
            })
        }

        fn borrow_calls(&self) -> Vec<(u32, u32)> {
            self.borrow_calls.lock().unwrap().clone()
        }

        fn return_calls(&self) -> Vec<u32> {
            self.return_calls.lock().unwrap().clone()
        }
    }

    impl CatalogApi for FakeCatalog {
        async fn list_books(&self) -> ApiResult<Vec<Book>> {
            Ok(self.books.clone())
        }
        async fn user_home(&self, _user_id: u32) -> ApiResult<UserHome> {
            Ok(self.home.clone())
        }
        async fn borrow_book(&self, book_id: u32, user_id: u32) -> ApiResult<String> {
            self.borrow_calls.lock().unwrap().push((book_id, user_id));
            self.borrow_result.clone()
        }
        async fn return_book(&self, record_id: u32) -> ApiResult<String> {
            self.return_calls.lock().unwrap().push(record_id);
            self.return_result.clone()
        }
    }

    /// Decoder that always finds the given payload
    struct PayloadDecoder {
        payload: String,
        calls: AtomicU32,
    }

    impl PayloadDecoder {
        fn new(payload: &str) -> Arc<Self> {
            Arc::new(Self {
                payload: payload.to_string(),
                calls: AtomicU32::new(0),
            })
        }
    }

    impl FrameDecoder for PayloadDecoder {
        fn decode(&self, _frame: &CameraFrame) -> Option<ScanResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(ScanResult::new(self.payload.clone(), None))
        }
    }

    /// Decoder that never finds anything
    struct NeverDecoder;
    impl FrameDecoder for NeverDecoder {
        fn decode(&self, _frame: &CameraFrame) -> Option<ScanResult> {
            None
        }
    }

    /// Decoder that always crashes
    struct PanickingDecoder;
    impl FrameDecoder for PanickingDecoder {
        fn decode(&self, _frame: &CameraFrame) -> Option<ScanResult> {
            panic!("synthetic decoder crash");
        }
    }

    // ===== Helpers =====

    fn test_settings() -> ScanSettings {
        ScanSettings {
            sample_rate_hz: 10,
            constraints: CameraConstraints {
                facing: None,
                ..CameraConstraints::default()
            },
            preferred_camera: None,
            message_timeout: Duration::from_millis(100),
            navigation_delay: Duration::from_millis(50),
        }
    }

    fn user(user_id: u32) -> UserSession {
        UserSession {
            user_id,
            username: "alice".to_string(),
        }
    }

    fn available_book(id: u32, title: &str, isbn: &str) -> Book {
        Book {
            id,
            title: title.to_string(),
            author: "Author".to_string(),
            isbn: isbn.to_string(),
            is_borrowed: false,
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ScreenEvent>) -> ScreenEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for screen event")
            .expect("event channel closed")
    }

    /// Drain events until `pred` matches, returning the matching event
    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<ScreenEvent>,
        pred: impl Fn(&ScreenEvent) -> bool,
    ) -> ScreenEvent {
        loop {
            let event = next_event(rx).await;
            if pred(&event) {
                return event;
            }
        }
    }

    // ===== Scenarios =====

    #[tokio::test(flavor = "multi_thread")]
    async fn test_borrow_flow_issues_single_request_and_navigates() {
        let backend = FakeBackend::new();
        let catalog =
            FakeCatalog::with_books(vec![available_book(7, "Dune", "9780000000001")]);
        let (coordinator, mut events) = ScanCoordinator::new(
            backend.clone() as Arc<dyn CameraBackend>,
            Arc::clone(&catalog),
            PayloadDecoder::new("9780000000001"),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;

        let nav = wait_for(&mut events, |e| matches!(e, ScreenEvent::Navigate(_))).await;
        assert_eq!(
            nav,
            ScreenEvent::Navigate(Navigation::BookDetail { book_id: 7 })
        );

        assert_eq!(catalog.borrow_calls(), vec![(7, 42)]);
        assert!(catalog.return_calls().is_empty());
        assert!(backend.sessions().iter().all(|s| s.is_stopped()));
        assert_eq!(coordinator.state(), ScanState::NavigatingAway);
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_confirmation_message_is_persistent_and_verbatim() {
        let backend = FakeBackend::new();
        let catalog =
            FakeCatalog::with_books(vec![available_book(7, "Dune", "9780000000001")]);
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            catalog,
            PayloadDecoder::new("9780000000001"),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;

        let message = wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        match message {
            ScreenEvent::Message(msg) => {
                assert!(msg.persistent);
                assert_eq!(msg.text, "borrowed, due in 60 days");
            }
            _ => unreachable!(),
        }
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_payload_makes_no_action_calls() {
        let backend = FakeBackend::new();
        let catalog =
            FakeCatalog::with_books(vec![available_book(7, "Dune", "9780000000001")]);
        let (coordinator, mut events) = ScanCoordinator::new(
            backend.clone() as Arc<dyn CameraBackend>,
            Arc::clone(&catalog),
            PayloadDecoder::new("0000000000000"),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;

        let message = wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        match message {
            ScreenEvent::Message(msg) => {
                assert_eq!(msg.kind, crate::app::state::MessageKind::Error);
                assert!(msg.text.contains("No catalog entry"));
            }
            _ => unreachable!(),
        }
        wait_for(&mut events, |e| {
            matches!(e, ScreenEvent::StateChanged(ScanState::Idle))
        })
        .await;

        assert!(catalog.borrow_calls().is_empty());
        assert!(catalog.return_calls().is_empty());
        // The loop does not restart on its own
        assert_eq!(coordinator.state(), ScanState::Idle);
        assert_eq!(backend.opened(), 1);
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_return_without_open_record_is_a_domain_error() {
        let backend = FakeBackend::new();
        let catalog = FakeCatalog::with_home(
            vec![available_book(7, "Dune", "9780000000001")],
            UserHome::default(),
        );
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            Arc::clone(&catalog),
            PayloadDecoder::new("9780000000001"),
            Some(user(42)),
            Intent::Return,
            test_settings(),
        );

        coordinator.start().await;

        let message = wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        match message {
            ScreenEvent::Message(msg) => assert!(msg.text.contains("No open borrow record")),
            _ => unreachable!(),
        }
        assert!(catalog.return_calls().is_empty());
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_return_resolves_the_open_record() {
        let backend = FakeBackend::new();
        let home = UserHome {
            username: Some("alice".to_string()),
            borrowed_books: vec![BorrowRecord {
                id: 31,
                book_title: "Dune".to_string(),
                borrow_date: None,
                due_date: None,
                return_date: None,
                returned: false,
                is_overdue: false,
            }],
            all_records: Vec::new(),
        };
        let catalog = FakeCatalog::with_home(
            vec![available_book(7, "Dune", "9780000000001")],
            home,
        );
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            Arc::clone(&catalog),
            PayloadDecoder::new("9780000000001"),
            Some(user(42)),
            Intent::Return,
            test_settings(),
        );

        coordinator.start().await;
        wait_for(&mut events, |e| matches!(e, ScreenEvent::Navigate(_))).await;
        assert_eq!(catalog.return_calls(), vec![31]);
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_borrowed_book_is_rejected_without_network_call() {
        let backend = FakeBackend::new();
        let mut book = available_book(7, "Dune", "9780000000001");
        book.is_borrowed = true;
        let catalog = FakeCatalog::with_books(vec![book]);
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            Arc::clone(&catalog),
            PayloadDecoder::new("9780000000001"),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        let message = wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        match message {
            ScreenEvent::Message(msg) => assert!(msg.text.contains("already on loan")),
            _ => unreachable!(),
        }
        assert!(catalog.borrow_calls().is_empty());
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_user_is_a_domain_error() {
        let backend = FakeBackend::new();
        let catalog =
            FakeCatalog::with_books(vec![available_book(7, "Dune", "9780000000001")]);
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            Arc::clone(&catalog),
            PayloadDecoder::new("9780000000001"),
            None,
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        let message = wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        match message {
            ScreenEvent::Message(msg) => assert!(msg.text.contains("Sign in")),
            _ => unreachable!(),
        }
        assert!(catalog.borrow_calls().is_empty());
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_error_message_is_shown_verbatim() {
        let backend = FakeBackend::new();
        let catalog = Arc::new(FakeCatalog {
            books: vec![available_book(7, "Dune", "9780000000001")],
            home: UserHome::default(),
            borrow_result: Err(ApiError::Server {
                status: 409,
                message: "您已借閱此書且尚未歸還".to_string(),
            }),
            return_result: Ok(String::new()),
            borrow_calls: Mutex::new(Vec::new()),
            return_calls: Mutex::new(Vec::new()),
        });
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            catalog,
            PayloadDecoder::new("9780000000001"),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        let message = wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        match message {
            ScreenEvent::Message(msg) => assert_eq!(msg.text, "您已借閱此書且尚未歸還"),
            _ => unreachable!(),
        }
        wait_for(&mut events, |e| {
            matches!(e, ScreenEvent::StateChanged(ScanState::Idle))
        })
        .await;
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_permission_denied_start_enters_error_without_sampling() {
        let backend = FakeBackend::failing(CameraError::PermissionDenied(
            "/dev/video0".to_string(),
        ));
        let catalog = FakeCatalog::with_books(Vec::new());
        let decoder = PayloadDecoder::new("whatever");
        let (coordinator, mut events) = ScanCoordinator::new(
            backend.clone() as Arc<dyn CameraBackend>,
            catalog,
            Arc::clone(&decoder) as Arc<dyn FrameDecoder>,
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        wait_for(&mut events, |e| {
            matches!(e, ScreenEvent::StateChanged(ScanState::Error(_)))
        })
        .await;

        assert_eq!(backend.opened(), 0);
        // No frame was ever sampled
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_repeated_decoder_crashes_release_the_camera() {
        let backend = FakeBackend::new();
        let catalog = FakeCatalog::with_books(Vec::new());
        let (coordinator, mut events) = ScanCoordinator::new(
            backend.clone() as Arc<dyn CameraBackend>,
            catalog,
            Arc::new(PanickingDecoder),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        wait_for(&mut events, |e| {
            matches!(e, ScreenEvent::StateChanged(ScanState::Error(_)))
        })
        .await;

        assert!(backend.sessions().iter().all(|s| s.is_stopped()));
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_while_scanning_is_a_no_op() {
        let backend = FakeBackend::new();
        let catalog = FakeCatalog::with_books(Vec::new());
        let (coordinator, mut events) = ScanCoordinator::new(
            backend.clone() as Arc<dyn CameraBackend>,
            catalog,
            Arc::new(NeverDecoder),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        wait_for(&mut events, |e| {
            matches!(e, ScreenEvent::StateChanged(ScanState::Scanning))
        })
        .await;

        coordinator.start().await;
        coordinator.start().await;
        assert_eq!(backend.opened(), 1);
        assert_eq!(coordinator.state(), ScanState::Scanning);
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_teardown_during_start_releases_the_acquired_stream() {
        let (backend, gate) = FakeBackend::gated();
        let catalog = FakeCatalog::with_books(Vec::new());
        let (coordinator, _events) = ScanCoordinator::new(
            backend.clone() as Arc<dyn CameraBackend>,
            catalog,
            Arc::new(NeverDecoder),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        let starter = coordinator.clone();
        let start_task = tokio::spawn(async move { starter.start().await });

        // Let start() reach the blocked open(), then tear down
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.teardown();
        gate.send(()).unwrap();

        timeout(Duration::from_secs(5), start_task)
            .await
            .expect("start task hung")
            .unwrap();

        let sessions = backend.sessions();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_stopped(), "acquired stream must be released");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_error_message_auto_dismisses() {
        let backend = FakeBackend::new();
        let catalog = FakeCatalog::with_books(Vec::new());
        let (coordinator, mut events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            catalog,
            PayloadDecoder::new("nope"),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        wait_for(&mut events, |e| matches!(e, ScreenEvent::Message(_))).await;
        wait_for(&mut events, |e| matches!(e, ScreenEvent::MessageCleared)).await;
        coordinator.teardown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_teardown_is_idempotent() {
        let backend = FakeBackend::new();
        let catalog = FakeCatalog::with_books(Vec::new());
        let (coordinator, _events) = ScanCoordinator::new(
            backend as Arc<dyn CameraBackend>,
            catalog,
            Arc::new(NeverDecoder),
            Some(user(42)),
            Intent::Borrow,
            test_settings(),
        );

        coordinator.start().await;
        coordinator.teardown();
        coordinator.teardown();
        coordinator.teardown();
    }
}
