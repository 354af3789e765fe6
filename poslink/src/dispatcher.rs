//! Event dispatcher
//!
//! The read loop publishes [`DeviceEvent`]s into a bounded queue and moves on;
//! a dedicated thread drains the queue and calls the registered handlers in
//! order. When the queue is full the oldest event is discarded, so a slow
//! handler can never stall the link.
//!
//! There is one handler slot per event kind. Registering a handler replaces
//! the previous one and returns a [`Subscription`] through which handler
//! failures are reported.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use poslink_core::DeviceEvent;

/// Serial input handler: `(tag, payload)`
pub type SerialHandler = dyn Fn(u32, &str) -> Result<(), HandlerError> + Send + Sync;

/// Connection state handler: `(connected, device_id)`
pub type StateHandler = dyn Fn(bool, &str) -> Result<(), HandlerError> + Send + Sync;

/// Errors buffered per subscription before further ones are dropped
const ERROR_BUFFER: usize = 32;

/// Failure raised by an event handler
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// Event kinds a handler can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SerialInput,
    StateChange,
}

struct Registration<H: ?Sized> {
    id: u64,
    handler: Arc<H>,
    errors: mpsc::Sender<HandlerError>,
    reported: Arc<AtomicU64>,
}

struct QueueState {
    events: VecDeque<DeviceEvent>,
    closed: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    next_id: AtomicU64,
    serial: Mutex<Option<Registration<SerialHandler>>>,
    state: Mutex<Option<Registration<StateHandler>>>,
}

/// Bounded, order-preserving event dispatcher
pub struct EventDispatcher {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl EventDispatcher {
    /// Create a dispatcher and start its delivery thread
    pub fn new(capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            serial: Mutex::new(None),
            state: Mutex::new(None),
        });

        let worker = shared.clone();
        std::thread::Builder::new()
            .name("poslink-events".into())
            .spawn(move || run(worker))?;

        Ok(Self {
            shared,
            closed: AtomicBool::new(false),
        })
    }

    /// Queue an event for delivery; never blocks on handlers
    pub fn publish(&self, event: DeviceEvent) {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return;
        }

        if queue.events.len() >= self.shared.capacity {
            if let Some(oldest) = queue.events.pop_front() {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    event = %oldest,
                    capacity = self.shared.capacity,
                    dropped_total = dropped,
                    "Event queue full, dropping oldest event"
                );
            }
        }

        trace!(event = %event, "Queued device event");
        queue.events.push_back(event);
        drop(queue);

        self.shared.ready.notify_one();
    }

    /// Register the serial input handler, replacing any previous one
    pub fn register_serial_handler<F>(&self, handler: F) -> Subscription
    where
        F: Fn(u32, &str) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Arc<SerialHandler> = Arc::new(handler);
        let (registration, subscription) = self.subscription(EventKind::SerialInput, handler);
        let id = registration.id;
        let previous = self.shared.serial.lock().replace(registration);
        if let Some(previous) = previous {
            debug!(replaced = previous.id, id, "Replaced serial input handler");
        }
        subscription
    }

    /// Register the connection state handler, replacing any previous one
    pub fn register_state_handler<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool, &str) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Arc<StateHandler> = Arc::new(handler);
        let (registration, subscription) = self.subscription(EventKind::StateChange, handler);
        let id = registration.id;
        let previous = self.shared.state.lock().replace(registration);
        if let Some(previous) = previous {
            debug!(replaced = previous.id, id, "Replaced state handler");
        }
        subscription
    }

    fn subscription<H: ?Sized>(&self, kind: EventKind, handler: Arc<H>) -> (Registration<H>, Subscription) {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(ERROR_BUFFER);
        let reported = Arc::new(AtomicU64::new(0));

        let registration = Registration {
            id,
            handler,
            errors: tx,
            reported: reported.clone(),
        };
        let subscription = Subscription {
            id,
            kind,
            errors: rx,
            reported,
            shared: Arc::downgrade(&self.shared),
        };
        (registration, subscription)
    }

    /// Events discarded because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn queued_events(&self) -> usize {
        self.shared.queue.lock().events.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Stop the delivery thread; queued events are discarded
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut queue = self.shared.queue.lock();
        queue.closed = true;
        let discarded = queue.events.len();
        queue.events.clear();
        drop(queue);

        self.shared.ready.notify_all();
        debug!(discarded, "Event dispatcher closed");
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Handle to a registered handler
///
/// Dropping the subscription leaves the handler registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    errors: mpsc::Receiver<HandlerError>,
    reported: Arc<AtomicU64>,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether this handler still occupies its slot
    pub fn is_active(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        match self.kind {
            EventKind::SerialInput => shared.serial.lock().as_ref().is_some_and(|r| r.id == self.id),
            EventKind::StateChange => shared.state.lock().as_ref().is_some_and(|r| r.id == self.id),
        }
    }

    /// Remove the handler if it is still the active one
    pub fn unsubscribe(self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let removed = match self.kind {
            EventKind::SerialInput => take_if(&shared.serial, self.id),
            EventKind::StateChange => take_if(&shared.state, self.id),
        };
        if removed {
            debug!(id = self.id, kind = ?self.kind, "Handler unsubscribed");
        }
        removed
    }

    /// Wait for the next handler failure
    ///
    /// Returns `None` once the handler has been replaced or removed and all
    /// buffered errors were read.
    pub async fn next_error(&mut self) -> Option<HandlerError> {
        self.errors.recv().await
    }

    pub fn try_next_error(&mut self) -> Option<HandlerError> {
        self.errors.try_recv().ok()
    }

    /// Total handler failures, including ones that did not fit the buffer
    pub fn errors_reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

fn take_if<H: ?Sized>(slot: &Mutex<Option<Registration<H>>>, id: u64) -> bool {
    let mut slot = slot.lock();
    if slot.as_ref().is_some_and(|r| r.id == id) {
        slot.take();
        true
    } else {
        false
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let event = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.closed {
                    return;
                }
                if let Some(event) = queue.events.pop_front() {
                    break event;
                }
                shared.ready.wait(&mut queue);
            }
        };

        deliver(&shared, event);
    }
}

fn deliver(shared: &Shared, event: DeviceEvent) {
    match &event {
        DeviceEvent::SerialInput { tag, payload } => {
            let target = shared
                .serial
                .lock()
                .as_ref()
                .map(|r| (r.id, r.handler.clone(), Reporter::from(r)));
            match target {
                Some((id, handler, reporter)) => {
                    let outcome = invoke(|| handler(*tag, payload));
                    reporter.report(id, &event, outcome);
                }
                None => trace!(event = %event, "No serial input handler registered"),
            }
        }
        DeviceEvent::StateChange {
            connected,
            device_id,
        } => {
            let target = shared
                .state
                .lock()
                .as_ref()
                .map(|r| (r.id, r.handler.clone(), Reporter::from(r)));
            match target {
                Some((id, handler, reporter)) => {
                    let outcome = invoke(|| handler(*connected, device_id));
                    reporter.report(id, &event, outcome);
                }
                None => trace!(event = %event, "No state handler registered"),
            }
        }
    }
}

fn invoke<F>(call: F) -> Result<(), HandlerError>
where
    F: FnOnce() -> Result<(), HandlerError>,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

struct Reporter {
    errors: mpsc::Sender<HandlerError>,
    reported: Arc<AtomicU64>,
}

impl<H: ?Sized> From<&Registration<H>> for Reporter {
    fn from(registration: &Registration<H>) -> Self {
        Self {
            errors: registration.errors.clone(),
            reported: registration.reported.clone(),
        }
    }
}

impl Reporter {
    fn report(&self, id: u64, event: &DeviceEvent, outcome: Result<(), HandlerError>) {
        let Err(error) = outcome else {
            return;
        };

        self.reported.fetch_add(1, Ordering::Relaxed);
        warn!(subscription = id, event = %event, error = %error, "Event handler failed");

        if self.errors.try_send(error).is_err() {
            debug!(subscription = id, "Handler error not buffered, buffer full or subscription gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::{Duration, Instant};

    fn serial(tag: u32) -> DeviceEvent {
        DeviceEvent::SerialInput {
            tag,
            payload: format!("data-{}", tag),
        }
    }

    #[test]
    fn test_delivers_in_order() {
        let dispatcher = EventDispatcher::new(16).unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);

        let _sub = dispatcher.register_serial_handler(move |tag, _| {
            tx.lock().send(tag).map_err(HandlerError::failed)
        });

        for tag in 0..10 {
            dispatcher.publish(serial(tag));
        }

        let seen: Vec<u32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_register_replaces_handler() {
        let dispatcher = EventDispatcher::new(16).unwrap();
        let (tx, rx) = std_mpsc::channel();
        let first_tx = Mutex::new(tx.clone());
        let second_tx = Mutex::new(tx);

        let first = dispatcher.register_state_handler(move |_, _| {
            first_tx.lock().send("first").map_err(HandlerError::failed)
        });
        let second = dispatcher.register_state_handler(move |_, _| {
            second_tx.lock().send("second").map_err(HandlerError::failed)
        });

        assert!(!first.is_active());
        assert!(second.is_active());

        dispatcher.publish(DeviceEvent::StateChange {
            connected: true,
            device_id: "dev".into(),
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "second");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // A stale subscription cannot remove its replacement
        assert!(!first.unsubscribe());
        assert!(second.is_active());
        assert!(second.unsubscribe());
    }

    #[test]
    fn test_handler_errors_are_isolated() {
        let dispatcher = EventDispatcher::new(16).unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);

        let mut sub = dispatcher.register_serial_handler(move |tag, _| {
            match tag {
                1 => Err(HandlerError::failed("bad tag")),
                2 => panic!("handler blew up"),
                _ => tx.lock().send(tag).map_err(HandlerError::failed),
            }
        });

        for tag in 0..4 {
            dispatcher.publish(serial(tag));
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 0);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 3);

        assert_eq!(sub.try_next_error(), Some(HandlerError::Failed("bad tag".into())));
        assert_eq!(
            sub.try_next_error(),
            Some(HandlerError::Panicked("handler blew up".into()))
        );
        assert_eq!(sub.try_next_error(), None);
        assert_eq!(sub.errors_reported(), 2);
    }

    #[test]
    fn test_overflow_drops_oldest_without_blocking() {
        let dispatcher = EventDispatcher::new(4).unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);

        let _sub = dispatcher.register_serial_handler(move |tag, _| {
            std::thread::sleep(Duration::from_millis(20));
            tx.lock().send(tag).map_err(HandlerError::failed)
        });

        let started = Instant::now();
        for tag in 0..200 {
            dispatcher.publish(serial(tag));
        }
        // 200 events against a 20ms consumer: blocking would take seconds
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(dispatcher.dropped_events() > 0);
        assert!(dispatcher.queued_events() <= 4);

        let mut seen = Vec::new();
        while let Ok(tag) = rx.recv_timeout(Duration::from_secs(1)) {
            seen.push(tag);
            if tag == 199 {
                break;
            }
        }

        // Newest event survives, order is preserved, and the total adds up
        assert_eq!(seen.last(), Some(&199));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.len() as u64 + dispatcher.dropped_events(), 200);
    }

    #[test]
    fn test_close_stops_delivery() {
        let dispatcher = EventDispatcher::new(4).unwrap();
        let (tx, rx) = std_mpsc::channel();
        let tx = Mutex::new(tx);
        let _sub = dispatcher.register_serial_handler(move |tag, _| {
            tx.lock().send(tag).map_err(HandlerError::failed)
        });

        dispatcher.close();
        dispatcher.publish(serial(1));

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(dispatcher.queued_events(), 0);
    }
}
