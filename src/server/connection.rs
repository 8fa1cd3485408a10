//! Per-connection worker
//!
//! Reads request frames, dispatches them to the broker and writes replies,
//! interleaving notifications queued for the connection. Each connection
//! owns one notification queue; every subscription it makes targets that
//! queue. When the transport closes for any reason the session is torn down
//! as a dead client.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::notify::{delivery_channel, DeliveryTarget, Notification, NotificationReceiver};
use crate::protocol::{ClientFrame, CodecError, Request, Response, ServerCodec, ServerFrame};
use crate::session::ClientHandle;

enum Event {
    Frame(Option<Result<ClientFrame, CodecError>>),
    Notification(Notification),
    Shutdown,
}

/// One client connection bound to at most one broker session
pub struct Connection<S> {
    id: u64,
    framed: Framed<S, ServerCodec>,
    broker: Arc<Broker>,
    handle: ClientHandle,
    target: DeliveryTarget,
    events: NotificationReceiver,
    shutdown: watch::Receiver<bool>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, stream: S, broker: Arc<Broker>, shutdown: watch::Receiver<bool>) -> Self {
        let (target, events) = delivery_channel(broker.config().delivery_queue_capacity);

        Self {
            id,
            framed: Framed::new(stream, ServerCodec::new()),
            broker,
            handle: ClientHandle::UNASSIGNED,
            target,
            events,
            shutdown,
        }
    }

    /// Session bound to this connection, if any
    pub fn handle(&self) -> ClientHandle {
        self.handle
    }

    /// Serve the connection until it closes, then tear down its session
    pub async fn run(&mut self) -> Result<(), CodecError> {
        let result = self.serve().await;

        if self.handle != ClientHandle::UNASSIGNED {
            self.broker.client_died(self.handle).await;
            self.handle = ClientHandle::UNASSIGNED;
        }

        result
    }

    async fn serve(&mut self) -> Result<(), CodecError> {
        loop {
            let event = tokio::select! {
                frame = self.framed.next() => Event::Frame(frame),
                Some(notification) = self.events.recv() => Event::Notification(notification),
                _ = self.shutdown.changed() => Event::Shutdown,
            };

            match event {
                Event::Frame(None) => {
                    tracing::debug!(connection = self.id, client = %self.handle, "Peer closed connection");
                    return Ok(());
                }
                Event::Frame(Some(Err(e))) => return Err(e),
                Event::Frame(Some(Ok(frame))) => {
                    let name = frame.request.name();
                    let result = self.dispatch(frame.request).await;
                    if let Err(ref e) = result {
                        tracing::debug!(
                            connection = self.id,
                            client = %self.handle,
                            request = name,
                            error = %e,
                            "Request failed"
                        );
                    }

                    self.framed
                        .send(ServerFrame::Reply {
                            id: frame.id,
                            result: result.map_err(Into::into),
                        })
                        .await?;
                }
                Event::Notification(notification) => {
                    self.framed
                        .send(ServerFrame::Notification(notification))
                        .await?;
                }
                Event::Shutdown => {
                    tracing::debug!(connection = self.id, "Closing connection for shutdown");
                    return Ok(());
                }
            }
        }
    }

    fn target(&self, subscribe: bool) -> Option<DeliveryTarget> {
        subscribe.then(|| self.target.clone())
    }

    async fn dispatch(&mut self, request: Request) -> Result<Response, BrokerError> {
        let broker = Arc::clone(&self.broker);
        let handle = self.handle;

        match request {
            Request::Connect { pid } => {
                if handle != ClientHandle::UNASSIGNED {
                    return Err(BrokerError::internal(format!(
                        "connection already bound to {}",
                        handle
                    )));
                }
                let handle = broker.connect(pid).await?;
                self.handle = handle;
                Ok(Response::Connected { handle })
            }
            Request::Disconnect => {
                broker.disconnect(handle).await;
                self.handle = ClientHandle::UNASSIGNED;
                Ok(Response::Done)
            }
            Request::GetDeviceStates { subscribe } => {
                let states = broker.get_device_states(handle, self.target(subscribe)).await?;
                Ok(Response::DeviceStates { states })
            }
            Request::GetProperties {
                guid,
                match_address,
                subscribe,
            } => {
                let addresses = broker
                    .get_properties(handle, guid, match_address, self.target(subscribe))
                    .await?;
                Ok(Response::Properties { addresses })
            }
            Request::GetPropertyState {
                guid,
                address,
                qualifier,
            } => {
                let data = broker
                    .get_property_state(handle, guid, address, qualifier)
                    .await?;
                Ok(Response::PropertyState { data })
            }
            Request::SetPropertyState {
                guid,
                address,
                qualifier,
                data,
                send_changed_notifications,
            } => {
                broker
                    .set_property_state(handle, guid, address, qualifier, data, send_changed_notifications)
                    .await?;
                Ok(Response::Done)
            }
            Request::GetControlList { guid } => {
                let controls = broker.get_control_list(handle, guid).await?;
                Ok(Response::ControlList { controls })
            }
            Request::GetControls { guid, subscribe } => {
                let controls = broker
                    .get_controls(handle, guid, self.target(subscribe))
                    .await?;
                Ok(Response::Controls { controls })
            }
            Request::SetControl { guid, id, value } => {
                let value = broker.set_control(handle, guid, id, value).await?;
                Ok(Response::ControlApplied { value })
            }
            Request::ProcessRs422Command {
                guid,
                command,
                response_len,
            } => {
                let data = broker
                    .process_rs422_command(handle, guid, command, response_len)
                    .await?;
                Ok(Response::Rs422Response { data })
            }
            Request::StartStream {
                guid,
                scope,
                element,
                subscribe,
            } => {
                broker
                    .start_stream(handle, guid, scope, element, self.target(subscribe))
                    .await?;
                Ok(Response::Done)
            }
            Request::StopStream {
                guid,
                scope,
                element,
            } => {
                broker.stop_stream(handle, guid, scope, element).await?;
                Ok(Response::Done)
            }
            Request::Deck {
                guid,
                scope,
                element,
                command,
            } => {
                broker
                    .deck_command(handle, guid, scope, element, command)
                    .await?;
                Ok(Response::Done)
            }
            Request::Subscribe { kind } => {
                broker.subscribe(handle, kind, self.target.clone()).await?;
                Ok(Response::Done)
            }
            Request::Unsubscribe { kind } => {
                let removed = broker.unsubscribe(handle, kind).await?;
                Ok(Response::Unsubscribed { removed })
            }
        }
    }
}
