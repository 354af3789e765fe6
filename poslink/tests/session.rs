//! End-to-end scenarios against the simulated terminal

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use poslink::{
    Basket, BasketItem, CommandError, CommandKind, ConnectError, ConnectionState, DeviceClass,
    DeviceEvent, Error, FiscalRecord, HandlerError, Payment, Request, SessionConfig,
    SessionManager, Simulator, SimulatorMode, StatusCode,
};
use poslink_core::FrameKind;
use poslink_transport::{Link, LinkWriter, MemoryTransport, Transport};

const COMPANY: &str = "TokenLinuxTest";

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("poslink=debug")
        .with_test_writer()
        .try_init();
}

async fn connected_with(class: DeviceClass, config: SessionConfig) -> (SessionManager, Simulator) {
    init_logging();
    let (transport, simulator) = Simulator::memory(class);
    let manager = SessionManager::new(transport, config).unwrap();
    manager.connect(COMPANY).await.unwrap();
    (manager, simulator)
}

async fn connected(class: DeviceClass) -> (SessionManager, Simulator) {
    connected_with(class, SessionConfig::default()).await
}

fn x30tr_basket() -> Basket {
    Basket::new("a123ca24-ca2c-401c-8134-f0de2ec25c25", 9008)
        .with_customer_tax_id("11111111111")
        .with_item(
            BasketItem::new("İLAÇ", 1000, 1000)
                .with_section(2)
                .with_tax_percent(2000),
        )
        .with_tax_free_amount(5000)
        .with_payment(Payment::cash(6000, "Cash"))
}

#[tokio::test]
async fn x30tr_basket_is_accepted() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;

    assert_eq!(manager.active_device_index(), 0);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::Success);

    let received = simulator.baskets();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].items[0].tax_percent, 2000);
    assert_eq!(received[0], x30tr_basket());
}

#[tokio::test]
async fn basket_json_surface() {
    let (manager, simulator) = connected(DeviceClass::T300TR).await;

    let json = r#"{"basketID":"b-2","documentType":0,
        "items":[{"name":"Tea","price":500,"quantity":1000,"sectionNo":1,"taxPercent":1000,"type":0}]}"#;
    assert_eq!(manager.send_basket_json(json).await, StatusCode::Success);
    assert_eq!(manager.send_basket_json("{not json").await, StatusCode::InvalidData);
    assert_eq!(simulator.baskets().len(), 1);
}

#[tokio::test]
async fn payment_on_300tr() {
    let (manager, simulator) = connected(DeviceClass::T300TR).await;

    let payment = r#"{"amount":6000,"description":"Nakit","type":1}"#;
    assert_eq!(manager.send_payment_json(payment).await, StatusCode::Success);
    assert_eq!(simulator.payments(), vec![Payment::cash(6000, "Nakit")]);

    manager.teardown().await;
    assert_eq!(manager.send_payment_json(payment).await, StatusCode::NotConnected);
}

#[tokio::test]
async fn payment_without_connection() {
    init_logging();
    let (transport, _simulator) = Simulator::memory(DeviceClass::T300TR);
    let manager = SessionManager::new(transport, SessionConfig::default()).unwrap();

    assert_eq!(manager.active_device_index(), DeviceClass::NONE_INDEX);
    assert_eq!(
        manager.send_payment(&Payment::cash(6000, "Nakit")).await,
        StatusCode::NotConnected
    );
}

#[tokio::test]
async fn x30tr_rejects_standalone_payment() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;

    assert_eq!(
        manager.send_payment(&Payment::cash(6000, "Nakit")).await,
        StatusCode::DeviceRejected
    );
    assert!(simulator.payments().is_empty());
}

#[tokio::test]
async fn device_modes_map_to_status() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;

    simulator.set_mode(SimulatorMode::Busy);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::DeviceBusy);

    simulator.set_mode(SimulatorMode::Reject);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::DeviceRejected);

    simulator.set_mode(SimulatorMode::Normal);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::Success);
}

#[tokio::test]
async fn fiscal_info_round_trip() {
    let (manager, simulator) = connected(DeviceClass::T300TR).await;

    let record = FiscalRecord {
        serial_number: "TK0001234".into(),
        z_number: 12,
        receipt_number: 48,
        total_amount: 152_300,
        total_tax: 21_400,
        device_time: None,
    };
    simulator.set_fiscal_record(record.clone());

    assert_eq!(manager.get_fiscal_info().await.unwrap(), record);

    let json = manager.get_fiscal_info_json().await.unwrap();
    assert!(json.contains(r#""serialNo":"TK0001234""#));
}

#[tokio::test(start_paused = true)]
async fn silent_device_times_out() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;
    simulator.set_mode(SimulatorMode::Silent);

    let err = manager.get_fiscal_info().await.unwrap_err();

    assert!(matches!(err, Error::Command(CommandError::Timeout)));
    assert_eq!(err.status(), StatusCode::Timeout);
    assert_eq!(manager.pending_count(), 0);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn responses_match_by_correlation_id() {
    let (manager, simulator) = connected(DeviceClass::T300TR).await;
    simulator.set_reorder_batch(3);

    let basket_request = Request::basket(&x30tr_basket()).unwrap();
    let (fiscal, ping, basket) = tokio::join!(
        manager.issue(Request::fiscal_info()),
        manager.issue(Request::ping()),
        manager.issue(basket_request),
    );

    let fiscal = fiscal.unwrap();
    let ping = ping.unwrap();
    let basket = basket.unwrap();

    assert_eq!(fiscal.kind, FrameKind::AckData);
    assert!(!fiscal.payload.is_empty());
    assert_eq!(ping.kind, FrameKind::Ack);
    assert_eq!(basket.status(), StatusCode::Success);

    let mut ids = vec![fiscal.correlation_id, ping.correlation_id, basket.correlation_id];
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(simulator.baskets().len(), 1);
}

#[tokio::test]
async fn reconnect_cancels_in_flight_requests() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;
    simulator.set_mode(SimulatorMode::Silent);

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let manager = manager.clone();
        waiters.push(tokio::spawn(async move { manager.issue(Request::fiscal_info()).await }));
    }
    while manager.pending_count() < 3 {
        tokio::task::yield_now().await;
    }

    simulator.set_mode(SimulatorMode::Normal);
    let info = manager.reconnect().await.unwrap();
    assert_eq!(info.generation, 2);

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Err(CommandError::Cancelled));
    }
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(simulator.links_accepted(), 2);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::Success);
}

#[tokio::test]
async fn cancel_through_handle_id() {
    let (manager, simulator) = connected(DeviceClass::T300TR).await;
    simulator.set_mode(SimulatorMode::Silent);

    let handle = manager.submit(Request::ping()).await.unwrap();
    assert_eq!(handle.kind(), CommandKind::Ping);
    assert!(manager.cancel(handle.id()));

    assert_eq!(handle.wait().await, Err(CommandError::Cancelled));
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test]
async fn teardown_then_issue_fails_fast() {
    let (manager, _simulator) = connected(DeviceClass::X30TR).await;

    manager.teardown().await;
    manager.teardown().await;

    let result = timeout(Duration::from_millis(100), manager.issue(Request::ping()))
        .await
        .expect("issue must not wait when disconnected");
    assert_eq!(result, Err(CommandError::NotConnected));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.active_device_index(), DeviceClass::NONE_INDEX);
}

// A closed link counts as a lost connection: pending requests fail with
// `NotConnected` right away. A terminal that stays linked but never answers
// is the timeout case, see `silent_device_times_out`.
#[tokio::test]
async fn link_loss_is_reported() {
    init_logging();
    let (transport, simulator) = Simulator::memory(DeviceClass::T300TR);
    let manager = SessionManager::new(transport, SessionConfig::default()).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _states = manager.register_state_handler(move |connected, device_id| {
        tx.send((connected, device_id.to_owned()))
            .map_err(HandlerError::failed)
    });

    manager.connect(COMPANY).await.unwrap();
    let (connected, device_id) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(connected);
    assert_eq!(device_id, simulator.device_id());

    simulator.set_mode(SimulatorMode::Silent);
    let handle = manager.submit(Request::fiscal_info()).await.unwrap();
    simulator.drop_link();

    assert_eq!(handle.wait().await, Err(CommandError::NotConnected));
    assert_eq!(manager.state(), ConnectionState::Lost);

    let (connected, device_id) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(!connected);
    assert_eq!(device_id, simulator.device_id());

    // A lost link can be re-established with a plain connect
    simulator.set_mode(SimulatorMode::Normal);
    manager.connect(COMPANY).await.unwrap();
    let (connected, _) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(connected);
    assert_eq!(simulator.links_accepted(), 2);
}

#[tokio::test]
async fn serial_input_delivered_in_order() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _serial = manager.register_serial_handler(move |tag, data| {
        tx.send((tag, data.to_owned())).map_err(HandlerError::failed)
    });

    for tag in 0..5 {
        assert!(simulator.push_serial_input(tag, format!("card-{}", tag)));
    }

    for tag in 0..5 {
        let (seen, data) = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(seen, tag);
        assert_eq!(data, format!("card-{}", tag));
    }
}

#[tokio::test]
async fn failing_handler_does_not_stop_dispatch() {
    let (manager, simulator) = connected(DeviceClass::X30TR).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscription = manager.register_serial_handler(move |tag, _| {
        if tag == 1 {
            return Err(HandlerError::failed("unreadable card"));
        }
        tx.send(tag).map_err(HandlerError::failed)
    });

    for tag in 0..3 {
        simulator.push_serial_input(tag, "x");
    }

    assert_eq!(rx.recv().await, Some(0));
    assert_eq!(rx.recv().await, Some(2));
    assert_eq!(
        subscription.next_error().await,
        Some(HandlerError::Failed("unreadable card".into()))
    );
    assert_eq!(subscription.errors_reported(), 1);
}

#[tokio::test]
async fn slow_handler_drops_oldest_events() {
    let config = SessionConfig::default().with_event_queue_capacity(4);
    let (manager, simulator) = connected_with(DeviceClass::X30TR, config).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _serial = manager.register_serial_handler(move |tag, _| {
        std::thread::sleep(Duration::from_millis(20));
        tx.send(tag).map_err(HandlerError::failed)
    });

    for tag in 0..50 {
        simulator.push_event(DeviceEvent::SerialInput {
            tag,
            payload: "burst".into(),
        });
    }

    // The read loop keeps serving commands while the handler lags
    let rtt = timeout(Duration::from_secs(1), manager.ping()).await.unwrap().unwrap();
    assert!(rtt < Duration::from_secs(1));

    let mut seen = Vec::new();
    while let Ok(Some(tag)) = timeout(Duration::from_secs(2), rx.recv()).await {
        seen.push(tag);
        if tag == 49 {
            break;
        }
    }

    assert_eq!(seen.last(), Some(&49));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert!(manager.dispatcher().dropped_events() > 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_handshake() {
    init_logging();
    let (transport, simulator) = Simulator::memory(DeviceClass::X30TR);
    simulator.set_answer_handshake(false);
    let manager = SessionManager::new(transport, SessionConfig::default()).unwrap();

    let err = manager.connect(COMPANY).await.unwrap_err();

    assert!(matches!(err, ConnectError::DeviceNotResponding(_)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(manager.active_device_index(), DeviceClass::NONE_INDEX);
}

#[tokio::test(start_paused = true)]
async fn reconnect_retries_with_backoff() {
    let config = SessionConfig::default().with_reconnect_policy(
        3,
        Duration::from_millis(200),
        Duration::from_secs(2),
    );
    let (manager, simulator) = connected_with(DeviceClass::T300TR, config).await;
    let simulator = Arc::new(simulator);

    simulator.set_accepting(false);
    let reopen = {
        let simulator = simulator.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            simulator.set_accepting(true);
        })
    };

    let info = manager.reconnect().await.unwrap();
    reopen.await.unwrap();

    assert_eq!(info.device_class, DeviceClass::T300TR);
    assert_eq!(simulator.links_accepted(), 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up() {
    let (manager, simulator) = connected(DeviceClass::T300TR).await;
    simulator.set_accepting(false);

    let err = manager.reconnect().await.unwrap_err();

    assert!(matches!(err, ConnectError::TransportUnavailable(_)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

mock! {
    pub Terminal {}

    #[async_trait]
    impl Transport for Terminal {
        async fn open(&mut self) -> poslink_transport::Result<Link>;
        fn remote_addr(&self) -> String;
    }
}

#[tokio::test]
async fn unavailable_transport() {
    init_logging();
    let mut transport = MockTerminal::new();
    transport
        .expect_open()
        .times(1)
        .returning(|| Err(poslink_transport::Error::Unavailable("refused".into())));
    transport
        .expect_remote_addr()
        .return_const("mock://terminal".to_string());

    let manager = SessionManager::new(transport, SessionConfig::default()).unwrap();

    assert_eq!(manager.reconnect().await, Err(ConnectError::NeverConnected));

    let err = manager.connect(COMPANY).await.unwrap_err();
    assert!(matches!(err, ConnectError::TransportUnavailable(_)));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

/// Memory transport whose writer fails with `ConnectionReset` while
/// `failures` is above zero
struct FlakyTransport {
    inner: MemoryTransport,
    failures: Arc<AtomicUsize>,
}

struct FlakyWriter {
    inner: Box<dyn LinkWriter>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn open(&mut self) -> poslink_transport::Result<Link> {
        let link = self.inner.open().await?;
        let writer = FlakyWriter {
            inner: link.writer,
            failures: self.failures.clone(),
        };
        Ok(Link::new(Box::new(writer), link.reader))
    }

    fn remote_addr(&self) -> String {
        self.inner.remote_addr()
    }
}

#[async_trait]
impl LinkWriter for FlakyWriter {
    async fn write(&mut self, frame: &[u8]) -> poslink_transport::Result<()> {
        let fail = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset).into());
        }
        self.inner.write(frame).await
    }

    async fn close(&mut self) -> poslink_transport::Result<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn write_reset_is_retried_once() {
    init_logging();
    let (inner, simulator) = Simulator::memory(DeviceClass::X30TR);
    let failures = Arc::new(AtomicUsize::new(0));
    let transport = FlakyTransport {
        inner,
        failures: failures.clone(),
    };
    let manager = SessionManager::new(transport, SessionConfig::default()).unwrap();
    manager.connect(COMPANY).await.unwrap();

    failures.store(1, Ordering::Release);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::Success);
    assert_eq!(simulator.baskets().len(), 1);

    // A second reset in a row is reported
    failures.store(2, Ordering::Release);
    assert_eq!(manager.send_basket(&x30tr_basket()).await, StatusCode::NotConnected);
    assert_eq!(simulator.baskets().len(), 1);
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(failures.load(Ordering::Acquire), 0);
}
