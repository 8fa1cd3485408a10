//! End-to-end broker scenarios driven through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use device_broker::device::sample::SELECTOR_NAME;
use device_broker::device::{
    BackendError, BackendResult, ControlChange, ControlInfo, FailurePoint, StopReason,
};
use device_broker::{
    delivery_channel, Broker, BrokerConfig, BrokerError, DeckCommand, DeviceBackend, DeviceStatus,
    Element, EventKind, Guid, Notification, PropertyAddress, SampleDevice, Scope,
};

/// Holds property reads until opened, counting reads that entered and left
#[derive(Default)]
struct ReadGate {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
    finished: AtomicUsize,
}

impl ReadGate {
    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        drop(open);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

/// Device whose property reads take a fixed time or wait on a gate
struct SlowDevice {
    guid: Guid,
    delay: Duration,
    gate: Option<Arc<ReadGate>>,
}

impl SlowDevice {
    fn sleeping(guid: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            guid: Guid(guid),
            delay,
            gate: None,
        })
    }

    fn gated(guid: u64, gate: Arc<ReadGate>) -> Arc<Self> {
        Arc::new(Self {
            guid: Guid(guid),
            delay: Duration::ZERO,
            gate: Some(gate),
        })
    }
}

impl DeviceBackend for SlowDevice {
    fn guid(&self) -> Guid {
        self.guid
    }

    fn properties(&self, _match_address: &PropertyAddress) -> BackendResult<Vec<PropertyAddress>> {
        Ok(Vec::new())
    }

    fn property_state(&self, _address: &PropertyAddress, _qualifier: &[u8]) -> BackendResult<Bytes> {
        match &self.gate {
            Some(gate) => gate.pass(),
            None => std::thread::sleep(self.delay),
        }
        Ok(Bytes::from_static(b"slow"))
    }

    fn set_property_state(&self, _: &PropertyAddress, _: &[u8], _: &[u8]) -> BackendResult<()> {
        Err(BackendError::NotSupported("property writes".into()))
    }

    fn control_list(&self) -> BackendResult<Vec<ControlInfo>> {
        Ok(Vec::new())
    }

    fn controls(&self) -> BackendResult<Vec<ControlChange>> {
        Ok(Vec::new())
    }

    fn set_control(&self, id: u32, _value: u32) -> BackendResult<u32> {
        Err(BackendError::UnknownControl(id))
    }

    fn start_stream(&self, _scope: Scope, _element: Element) -> BackendResult<()> {
        Ok(())
    }

    fn stop_stream(&self, _scope: Scope, _element: Element) -> BackendResult<()> {
        Ok(())
    }

    fn deck(&self, _scope: Scope, _element: Element, _command: DeckCommand) -> BackendResult<()> {
        Err(BackendError::NotSupported("deck".into()))
    }

    fn rs422_command(&self, _command: &[u8], _response_len: usize) -> BackendResult<Bytes> {
        Err(BackendError::NotSupported("RS-422".into()))
    }
}

fn camera(guid: u64) -> Arc<SampleDevice> {
    Arc::new(
        SampleDevice::new(Guid(guid), "camera")
            .with_stream(Scope::Input, 0)
            .with_control(1, "Gain", 0, 0, 100),
    )
}

#[tokio::test]
async fn test_ownership_passes_on_after_client_death() {
    let broker = Broker::new();
    let device = camera(42);
    broker.add_device(device.clone()).await.unwrap();

    let a = broker.connect(100).await.unwrap();
    let b = broker.connect(200).await.unwrap();

    broker
        .start_stream(a, Guid(42), Scope::Input, 0, None)
        .await
        .unwrap();

    let result = broker.start_stream(b, Guid(42), Scope::Input, 0, None).await;
    assert!(matches!(
        result,
        Err(BrokerError::StreamAlreadyOwned { owner, .. }) if owner == a
    ));

    assert!(broker.client_died(a).await);
    assert!(!device.is_running(Scope::Input, 0));

    broker
        .start_stream(b, Guid(42), Scope::Input, 0, None)
        .await
        .unwrap();
    assert_eq!(
        broker.stream_owner(Guid(42), Scope::Input, 0).await,
        Some(b)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_teardown_stop_does_not_block_other_clients() {
    let broker = Arc::new(Broker::new());
    let slow = camera(1);
    slow.set_delay(FailurePoint::StopStream, Duration::from_secs(2));
    broker.add_device(slow.clone()).await.unwrap();
    broker.add_device(camera(2)).await.unwrap();

    let a = broker.connect(1).await.unwrap();
    let b = broker.connect(2).await.unwrap();
    broker.start_stream(a, Guid(1), Scope::Input, 0, None).await.unwrap();

    let teardown = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move { broker.client_died(a).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let controls = tokio::time::timeout(Duration::from_millis(500), broker.get_controls(b, Guid(2), None))
        .await
        .expect("call on another device waited for the teardown");
    assert!(controls.is_ok());
    assert!(!broker.is_connected(a).await);

    let result = broker.start_stream(b, Guid(1), Scope::Input, 0, None).await;
    assert!(matches!(
        result,
        Err(BrokerError::StreamAlreadyOwned { owner, .. }) if owner == a
    ));
    assert_eq!(broker.stream_owner(Guid(1), Scope::Input, 0).await, None);

    assert!(teardown.await.unwrap());
    assert!(!slow.is_running(Scope::Input, 0));

    slow.clear_delay(FailurePoint::StopStream);
    broker.start_stream(b, Guid(1), Scope::Input, 0, None).await.unwrap();
    assert_eq!(broker.stream_owner(Guid(1), Scope::Input, 0).await, Some(b));
}

#[test]
fn test_arrival_during_concurrent_property_reads() {
    const READS: usize = 1000;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .max_blocking_threads(READS + 64)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let broker = Arc::new(Broker::with_config(
            BrokerConfig::default().backend_timeout(Duration::from_secs(60)),
        ));
        let gate = Arc::new(ReadGate::default());
        for guid in 1..=4 {
            broker.add_device(SlowDevice::gated(guid, gate.clone())).await.unwrap();
        }

        let watcher = broker.connect(1).await.unwrap();
        let (target, mut rx) = delivery_channel(16);
        broker.get_device_states(watcher, Some(target)).await.unwrap();

        let mut sessions = Vec::new();
        for pid in 0..10 {
            sessions.push(broker.connect(1000 + pid).await.unwrap());
        }

        let mut reads = Vec::new();
        for i in 0..READS as u64 {
            let broker = Arc::clone(&broker);
            let handle = sessions[(i % 10) as usize];
            let guid = Guid(i % 4 + 1);
            reads.push(tokio::spawn(async move {
                broker
                    .get_property_state(handle, guid, PropertyAddress::global(SELECTOR_NAME), Bytes::new())
                    .await
            }));
        }

        let deadline = Instant::now() + Duration::from_secs(20);
        while gate.entered.load(Ordering::SeqCst) < READS {
            assert!(Instant::now() < deadline, "reads never reached the devices");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        broker.add_device(camera(99)).await.unwrap();

        let arrival = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("arrival was not delivered while reads were blocked");
        assert_eq!(
            arrival,
            Some(Notification::DeviceStatesChanged {
                guid: Guid(99),
                status: DeviceStatus::Present,
            })
        );
        assert_eq!(gate.finished.load(Ordering::SeqCst), 0);
        assert!(reads.iter().all(|read| !read.is_finished()));

        gate.open();
        for read in reads {
            let value = read.await.unwrap().unwrap();
            assert_eq!(value, Bytes::from_static(b"slow"));
        }
        assert_eq!(gate.finished.load(Ordering::SeqCst), READS);
        assert!(rx.try_recv().is_none());

        let states = broker.get_device_states(watcher, None).await.unwrap();
        assert_eq!(states.len(), 5);
        assert_eq!(states.last().map(|s| s.guid), Some(Guid(99)));
    });
}

#[tokio::test]
async fn test_notifications_arrive_in_publish_order() {
    let broker = Broker::new();
    broker.add_device(camera(7)).await.unwrap();
    let a = broker.connect(1).await.unwrap();
    let (target, mut rx) = delivery_channel(64);
    broker.get_controls(a, Guid(7), Some(target)).await.unwrap();

    for value in 0..20 {
        broker.set_control(a, Guid(7), 1, value).await.unwrap();
    }

    for value in 0..20 {
        assert_eq!(
            rx.recv().await,
            Some(Notification::ControlsChanged {
                guid: Guid(7),
                changes: vec![ControlChange { id: 1, value }],
            })
        );
    }
}

#[tokio::test]
async fn test_stalled_subscriber_does_not_affect_others() {
    let broker = Broker::new();
    broker.add_device(camera(7)).await.unwrap();

    let stalled = broker.connect(1).await.unwrap();
    let healthy = broker.connect(2).await.unwrap();
    let (stalled_target, mut stalled_rx) = delivery_channel(4);
    let (healthy_target, mut healthy_rx) = delivery_channel(64);
    broker
        .subscribe(stalled, EventKind::Controls(Guid(7)), stalled_target)
        .await
        .unwrap();
    broker
        .subscribe(healthy, EventKind::Controls(Guid(7)), healthy_target)
        .await
        .unwrap();

    for value in 0..10 {
        broker.set_control(healthy, Guid(7), 1, value).await.unwrap();
    }

    assert_eq!(healthy_rx.len(), 10);
    assert_eq!(stalled_rx.len(), 4);
    assert_eq!(stalled_rx.dropped(), 6);

    // The stalled subscriber keeps the newest notifications
    let first = stalled_rx.try_recv().unwrap();
    assert_eq!(
        first,
        Notification::ControlsChanged {
            guid: Guid(7),
            changes: vec![ControlChange { id: 1, value: 6 }],
        }
    );
    assert_eq!(broker.stats().await.notifications_dropped, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_device_only_delays_its_caller() {
    let broker = Arc::new(Broker::new());
    broker
        .add_device(SlowDevice::sleeping(1, Duration::from_millis(500)))
        .await
        .unwrap();
    broker.add_device(camera(2)).await.unwrap();

    let a = broker.connect(1).await.unwrap();
    let b = broker.connect(2).await.unwrap();

    let slow = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            broker
                .get_property_state(a, Guid(1), PropertyAddress::wildcard(), Bytes::new())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fast = tokio::time::timeout(
        Duration::from_millis(250),
        broker.get_controls(b, Guid(2), None),
    )
    .await
    .expect("fast device call was blocked by the slow one");
    assert!(fast.is_ok());

    assert_eq!(slow.await.unwrap().unwrap(), Bytes::from_static(b"slow"));
}

#[tokio::test]
async fn test_backend_timeout() {
    let broker = Broker::with_config(BrokerConfig::default().backend_timeout(Duration::from_millis(50)));
    broker
        .add_device(SlowDevice::sleeping(1, Duration::from_millis(300)))
        .await
        .unwrap();
    let a = broker.connect(1).await.unwrap();

    let result = broker
        .get_property_state(a, Guid(1), PropertyAddress::wildcard(), Bytes::new())
        .await;
    assert!(matches!(
        result,
        Err(BrokerError::BackendFailure {
            guid: Guid(1),
            source: BackendError::Timeout(_)
        })
    ));
}

#[tokio::test]
async fn test_disconnect_releases_everything() {
    let broker = Broker::new();
    let device = camera(5);
    broker.add_device(device.clone()).await.unwrap();

    let a = broker.connect(1).await.unwrap();
    let (target, _rx) = delivery_channel(8);
    broker.get_device_states(a, Some(target.clone())).await.unwrap();
    broker
        .start_stream(a, Guid(5), Scope::Input, 0, Some(target))
        .await
        .unwrap();

    let stats = broker.stats().await;
    assert_eq!(stats.owned_streams, 1);
    assert_eq!(stats.subscriptions, 2);

    assert!(broker.disconnect(a).await);

    let stats = broker.stats().await;
    assert_eq!(stats.sessions, 0);
    assert_eq!(stats.owned_streams, 0);
    assert_eq!(stats.subscriptions, 0);
    assert!(!device.is_running(Scope::Input, 0));
}

#[tokio::test]
async fn test_removed_device_stream_is_announced() {
    let broker = Broker::new();
    broker.add_device(camera(8)).await.unwrap();

    let owner = broker.connect(1).await.unwrap();
    let watcher = broker.connect(2).await.unwrap();
    let (target, mut rx) = delivery_channel(8);
    broker.get_device_states(watcher, Some(target)).await.unwrap();

    broker
        .start_stream(owner, Guid(8), Scope::Input, 0, None)
        .await
        .unwrap();
    broker.remove_device(Guid(8)).await.unwrap();

    assert_eq!(
        rx.try_recv(),
        Some(Notification::DeviceStatesChanged {
            guid: Guid(8),
            status: DeviceStatus::Removed,
        })
    );
    assert!(broker.session_stats(owner).await.unwrap().owned_streams.is_empty());

    let result = broker.get_controls(owner, Guid(8), None).await;
    assert!(matches!(result, Err(BrokerError::UnknownDevice(Guid(8)))));
}

#[tokio::test]
async fn test_no_data_timeout_signal() {
    let broker = Arc::new(Broker::new());
    let pump = broker.spawn_signal_pump().unwrap();
    let device = camera(11);
    broker.add_device(device.clone()).await.unwrap();

    let a = broker.connect(1).await.unwrap();
    let (target, mut rx) = delivery_channel(8);
    broker
        .start_stream(a, Guid(11), Scope::Input, 0, Some(target))
        .await
        .unwrap();

    assert!(device.no_data_timeout(Scope::Input, 0));

    let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        notification,
        Notification::StreamStopped {
            guid: Guid(11),
            reason: StopReason::NoDataTimeout,
            ..
        }
    ));
    assert_eq!(broker.stream_owner(Guid(11), Scope::Input, 0).await, None);

    pump.abort();
}
