//! Broker scenarios over a real loopback TCP connection

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use device_broker::device::sample::SELECTOR_NO_DATA_TIMEOUT;
use device_broker::{
    Broker, BrokerClient, BrokerServer, DeckCommand, DeviceStatus, ErrorKind, EventKind, Guid,
    Notification, PropertyAddress, SampleDevice, Scope, ServerConfig,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    broker: Arc<Broker>,
    device: Arc<SampleDevice>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let broker = Arc::new(Broker::new());
        let device = Arc::new(
            SampleDevice::new(Guid(42), "deck")
                .with_stream(Scope::Input, 0)
                .with_stream(Scope::Output, 0)
                .with_control(1, "Level", 5, 0, 10),
        );
        broker.add_device(device.clone()).await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = BrokerServer::new(ServerConfig::default(), Arc::clone(&broker));
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stopped.await;
                })
                .await
        });

        Self {
            addr,
            broker,
            device,
            stop: Some(stop),
            task,
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.unwrap().unwrap();
    }
}

async fn wait_for_sessions(broker: &Broker, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.stats().await.sessions != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session count did not settle");
}

#[tokio::test]
async fn test_ownership_over_tcp() {
    let server = TestServer::start().await;

    let (a, _a_events) = BrokerClient::connect(server.addr, 100).await.unwrap();
    let (b, _b_events) = BrokerClient::connect(server.addr, 200).await.unwrap();
    assert_ne!(a.handle(), b.handle());

    a.start_stream(Guid(42), Scope::Input, 0, false).await.unwrap();

    let err = b
        .start_stream(Guid(42), Scope::Input, 0, false)
        .await
        .unwrap_err();
    assert_eq!(err.broker_kind(), Some(ErrorKind::StreamAlreadyOwned));

    let err = b.stop_stream(Guid(42), Scope::Input, 0).await.unwrap_err();
    assert_eq!(err.broker_kind(), Some(ErrorKind::NotOwner));

    // Killing A's connection releases the stream
    a.close();
    wait_for_sessions(&server.broker, 1).await;
    assert!(!server.device.is_running(Scope::Input, 0));

    b.start_stream(Guid(42), Scope::Input, 0, false).await.unwrap();
    assert!(server.device.is_running(Scope::Input, 0));

    b.disconnect().await.unwrap();
    wait_for_sessions(&server.broker, 0).await;
    assert!(!server.device.is_running(Scope::Input, 0));

    server.shutdown().await;
}

#[tokio::test]
async fn test_notifications_over_tcp() {
    let server = TestServer::start().await;

    let (watcher, mut events) = BrokerClient::connect(server.addr, 1).await.unwrap();
    let (writer, _writer_events) = BrokerClient::connect(server.addr, 2).await.unwrap();

    let states = watcher.get_device_states(true).await.unwrap();
    assert_eq!(states.len(), 1);
    watcher.get_controls(Guid(42), true).await.unwrap();

    assert_eq!(writer.set_control(Guid(42), 1, 50).await.unwrap(), 10);

    let notification = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        notification,
        Notification::ControlsChanged { guid: Guid(42), .. }
    ));

    server
        .broker
        .add_device(Arc::new(SampleDevice::new(Guid(99), "late")))
        .await
        .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        notification,
        Notification::DeviceStatesChanged {
            guid: Guid(99),
            status: DeviceStatus::Present,
        }
    );

    assert!(watcher.unsubscribe(EventKind::DeviceStates).await.unwrap());
    assert!(!watcher.unsubscribe(EventKind::DeviceStates).await.unwrap());

    server.shutdown().await;
}

#[tokio::test]
async fn test_properties_rs422_and_deck_over_tcp() {
    let server = TestServer::start().await;
    let (client, _events) = BrokerClient::connect(server.addr, 7).await.unwrap();

    let all = client
        .get_properties(Guid(42), PropertyAddress::wildcard(), false)
        .await
        .unwrap();
    assert!(all.len() >= 4);

    let address = PropertyAddress::new(SELECTOR_NO_DATA_TIMEOUT, Scope::Input, 0);
    let value = Bytes::copy_from_slice(&250u32.to_le_bytes());
    client
        .set_property_state(Guid(42), address, Bytes::new(), value.clone(), false)
        .await
        .unwrap();
    assert_eq!(
        client
            .get_property_state(Guid(42), address, Bytes::new())
            .await
            .unwrap(),
        value
    );

    let response = client
        .process_rs422_command(Guid(42), Bytes::from_static(&[0x61, 0x0c]), 4)
        .await
        .unwrap();
    assert_eq!(&response[..2], &[0x61, 0x0c]);

    let err = client
        .process_rs422_command(Guid(42), Bytes::from(vec![0u8; 600]), 4)
        .await
        .unwrap_err();
    assert_eq!(err.broker_kind(), Some(ErrorKind::CommandTooLarge));

    client
        .deck(Guid(42), Scope::Output, 0, DeckCommand::StartThreads)
        .await
        .unwrap();
    client
        .deck(Guid(42), Scope::Output, 0, DeckCommand::Jog { speed: 4 })
        .await
        .unwrap();
    assert_eq!(server.device.deck_state(Scope::Output, 0).unwrap().speed, 4);

    server.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_disconnects_clients() {
    let server = TestServer::start().await;
    let (client, mut events) = BrokerClient::connect(server.addr, 1).await.unwrap();
    client.start_stream(Guid(42), Scope::Output, 0, false).await.unwrap();

    let broker = Arc::clone(&server.broker);
    let device = Arc::clone(&server.device);
    server.shutdown().await;

    assert_eq!(broker.stats().await.sessions, 0);
    assert!(!device.is_running(Scope::Output, 0));

    // The connection task ends once the server closes the socket
    let closed = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap();
    assert!(closed.is_none());
    assert!(client.get_device_states(false).await.is_err());
}
