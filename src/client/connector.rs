//! Broker client connection
//!
//! A background task owns the transport: it writes queued calls, matches
//! replies to callers by correlation id and forwards notifications into a
//! drop-oldest queue.

use std::collections::HashMap;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use super::error::{ClientError, Result};
use crate::device::{
    ControlChange, ControlInfo, DeckCommand, DeviceState, Element, Guid, PropertyAddress, Scope,
};
use crate::notify::{delivery_channel, Delivery, DeliveryTarget, EventKind, NotificationReceiver};
use crate::protocol::{ClientCodec, ClientFrame, Request, Response, ServerFrame, WireError};
use crate::session::ClientHandle;

/// Notifications buffered on the client before the oldest are discarded
pub const NOTIFICATION_BUFFER: usize = 256;

const CALL_QUEUE: usize = 64;

type Reply = oneshot::Sender<std::result::Result<Response, WireError>>;

/// Connected broker client
///
/// # Example
///
/// ```ignore
/// let (client, mut notifications) = BrokerClient::connect("127.0.0.1:7422", std::process::id()).await?;
///
/// let states = client.get_device_states(true).await?;
/// client.start_stream(states[0].guid, Scope::Input, 0, true).await?;
///
/// while let Some(notification) = notifications.recv().await {
///     println!("{:?}", notification);
/// }
/// ```
///
/// Dropping the client closes the connection; the broker then releases
/// everything the session held.
pub struct BrokerClient {
    handle: ClientHandle,
    calls: mpsc::Sender<(Request, Reply)>,
    task: JoinHandle<()>,
}

impl BrokerClient {
    /// Connect over TCP and open a session
    ///
    /// Returns the client and a receiver for notifications.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        pid: u32,
    ) -> Result<(Self, NotificationReceiver)> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::connect_with(stream, pid).await
    }

    /// Open a session over an established transport
    pub async fn connect_with<S>(stream: S, pid: u32) -> Result<(Self, NotificationReceiver)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::connect_with_buffer(stream, pid, NOTIFICATION_BUFFER).await
    }

    /// Open a session, buffering at most `capacity` unread notifications
    ///
    /// When the buffer is full the oldest unread notification is discarded.
    pub async fn connect_with_buffer<S>(
        stream: S,
        pid: u32,
        capacity: usize,
    ) -> Result<(Self, NotificationReceiver)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, ClientCodec::new());
        let (calls_tx, calls_rx) = mpsc::channel(CALL_QUEUE);
        let (notify_tx, notify_rx) = delivery_channel(capacity);

        let task = tokio::spawn(connection_task(framed, calls_rx, notify_tx));

        let mut client = Self {
            handle: ClientHandle::UNASSIGNED,
            calls: calls_tx,
            task,
        };

        match client.call(Request::Connect { pid }).await? {
            Response::Connected { handle } => {
                client.handle = handle;
                tracing::debug!(client = %handle, pid = pid, "Connected to broker");
                Ok((client, notify_rx))
            }
            _ => Err(ClientError::UnexpectedResponse { request: "Connect" }),
        }
    }

    /// Session handle assigned by the broker
    pub fn handle(&self) -> ClientHandle {
        self.handle
    }

    /// Check if the connection task is still running
    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn get_device_states(&self, subscribe: bool) -> Result<Vec<DeviceState>> {
        match self.call(Request::GetDeviceStates { subscribe }).await? {
            Response::DeviceStates { states } => Ok(states),
            _ => Err(unexpected("GetDeviceStates")),
        }
    }

    pub async fn get_properties(
        &self,
        guid: Guid,
        match_address: PropertyAddress,
        subscribe: bool,
    ) -> Result<Vec<PropertyAddress>> {
        let request = Request::GetProperties {
            guid,
            match_address,
            subscribe,
        };
        match self.call(request).await? {
            Response::Properties { addresses } => Ok(addresses),
            _ => Err(unexpected("GetProperties")),
        }
    }

    pub async fn get_property_state(
        &self,
        guid: Guid,
        address: PropertyAddress,
        qualifier: Bytes,
    ) -> Result<Bytes> {
        let request = Request::GetPropertyState {
            guid,
            address,
            qualifier,
        };
        match self.call(request).await? {
            Response::PropertyState { data } => Ok(data),
            _ => Err(unexpected("GetPropertyState")),
        }
    }

    pub async fn set_property_state(
        &self,
        guid: Guid,
        address: PropertyAddress,
        qualifier: Bytes,
        data: Bytes,
        send_changed_notifications: bool,
    ) -> Result<()> {
        let request = Request::SetPropertyState {
            guid,
            address,
            qualifier,
            data,
            send_changed_notifications,
        };
        self.call_done(request).await
    }

    pub async fn get_control_list(&self, guid: Guid) -> Result<Vec<ControlInfo>> {
        match self.call(Request::GetControlList { guid }).await? {
            Response::ControlList { controls } => Ok(controls),
            _ => Err(unexpected("GetControlList")),
        }
    }

    pub async fn get_controls(&self, guid: Guid, subscribe: bool) -> Result<Vec<ControlChange>> {
        match self.call(Request::GetControls { guid, subscribe }).await? {
            Response::Controls { controls } => Ok(controls),
            _ => Err(unexpected("GetControls")),
        }
    }

    /// Set a control; returns the value the device applied
    pub async fn set_control(&self, guid: Guid, id: u32, value: u32) -> Result<u32> {
        match self.call(Request::SetControl { guid, id, value }).await? {
            Response::ControlApplied { value } => Ok(value),
            _ => Err(unexpected("SetControl")),
        }
    }

    pub async fn process_rs422_command(
        &self,
        guid: Guid,
        command: Bytes,
        response_len: u32,
    ) -> Result<Bytes> {
        let request = Request::ProcessRs422Command {
            guid,
            command,
            response_len,
        };
        match self.call(request).await? {
            Response::Rs422Response { data } => Ok(data),
            _ => Err(unexpected("ProcessRs422Command")),
        }
    }

    pub async fn start_stream(
        &self,
        guid: Guid,
        scope: Scope,
        element: Element,
        subscribe: bool,
    ) -> Result<()> {
        self.call_done(Request::StartStream {
            guid,
            scope,
            element,
            subscribe,
        })
        .await
    }

    pub async fn stop_stream(&self, guid: Guid, scope: Scope, element: Element) -> Result<()> {
        self.call_done(Request::StopStream {
            guid,
            scope,
            element,
        })
        .await
    }

    /// Send a deck transport command
    pub async fn deck(
        &self,
        guid: Guid,
        scope: Scope,
        element: Element,
        command: DeckCommand,
    ) -> Result<()> {
        self.call_done(Request::Deck {
            guid,
            scope,
            element,
            command,
        })
        .await
    }

    pub async fn subscribe(&self, kind: EventKind) -> Result<()> {
        self.call_done(Request::Subscribe { kind }).await
    }

    /// Remove a subscription; returns whether it existed
    pub async fn unsubscribe(&self, kind: EventKind) -> Result<bool> {
        match self.call(Request::Unsubscribe { kind }).await? {
            Response::Unsubscribed { removed } => Ok(removed),
            _ => Err(unexpected("Unsubscribe")),
        }
    }

    /// Close the session, then the connection
    pub async fn disconnect(self) -> Result<()> {
        self.call_done(Request::Disconnect).await
    }

    /// Drop the connection without closing the session first
    ///
    /// The broker treats this as a dead client.
    pub fn close(self) {}

    async fn call_done(&self, request: Request) -> Result<()> {
        let name = request.name();
        match self.call(request).await? {
            Response::Done => Ok(()),
            _ => Err(unexpected(name)),
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let (tx, rx) = oneshot::channel();
        self.calls
            .send((request, tx))
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;

        let result = rx.await.map_err(|_| ClientError::ConnectionClosed)?;
        Ok(result?)
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("handle", &self.handle)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn unexpected(request: &'static str) -> ClientError {
    ClientError::UnexpectedResponse { request }
}

/// Background task that handles the actual socket I/O
async fn connection_task<S>(
    mut framed: Framed<S, ClientCodec>,
    mut calls: mpsc::Receiver<(Request, Reply)>,
    notifications: DeliveryTarget,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending: HashMap<u64, Reply> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            call = calls.recv() => {
                let Some((request, reply)) = call else {
                    break;
                };
                next_id += 1;
                if let Err(e) = framed.send(ClientFrame { id: next_id, request }).await {
                    tracing::warn!(error = %e, "Failed to send request");
                    break;
                }
                pending.insert(next_id, reply);
            }
            frame = framed.next() => match frame {
                Some(Ok(ServerFrame::Reply { id, result })) => {
                    match pending.remove(&id) {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => tracing::debug!(id = id, "Reply without pending call"),
                    }
                }
                Some(Ok(ServerFrame::Notification(notification))) => {
                    match notifications.deliver(notification) {
                        Delivery::Delivered => {}
                        Delivery::DroppedOldest => {
                            tracing::debug!(dropped = notifications.dropped(), "Notification buffer full, oldest discarded");
                        }
                        Delivery::Closed => tracing::trace!("Notification receiver gone"),
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Broker connection error");
                    break;
                }
                None => {
                    tracing::debug!("Broker closed connection");
                    break;
                }
            }
        }
    }

    // Pending callers observe ConnectionClosed
    drop(pending);
}
