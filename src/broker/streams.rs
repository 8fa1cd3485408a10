//! Stream ownership and deck transport
//!
//! A client starting a stream becomes its sole owner until it stops the
//! stream, disconnects, dies, or the device stops it. Ownership is claimed
//! under the state lock before the backend runs and rolled back if the
//! backend fails. A start that loses its claim while the backend runs never
//! stops a stream another client has since taken over.

use super::Broker;
use crate::device::{BackendError, DeckCommand, Element, Guid, Scope};
use crate::error::{BrokerError, Result};
use crate::notify::{DeliveryTarget, EventKind};
use crate::session::{ClientHandle, StreamSpecifier};

impl Broker {
    /// Start a stream, taking ownership of the endpoint
    ///
    /// Fails with `StreamAlreadyOwned` if another client owns it, including
    /// a client that took the endpoint over while this start was running. With a
    /// target, the caller is subscribed to stream events of the device once
    /// the stream is running.
    pub async fn start_stream(
        &self,
        handle: ClientHandle,
        guid: Guid,
        scope: Scope,
        element: Element,
        notify: Option<DeliveryTarget>,
    ) -> Result<()> {
        let stream = StreamSpecifier::new(guid, scope, element);

        let (backend, newly_claimed) = {
            let mut state = self.state.lock().await;
            let state = &mut *state;

            state.session_for_call(handle)?;
            let backend = self.registry.lookup(guid).await?;

            let newly_claimed = state.owners.owner(&stream).is_none();
            if let Err(owner) = state.owners.claim(stream, handle) {
                tracing::debug!(client = %handle, stream = %stream, owner = %owner, "Stream already owned");
                return Err(BrokerError::StreamAlreadyOwned { stream, owner });
            }
            if let Some(session) = state.sessions.get_mut(&handle) {
                session.own(stream);
            }

            (backend, newly_claimed)
        };

        let result = self
            .run_backend(guid, backend.clone(), move |b| b.start_stream(scope, element))
            .await;

        let lost = {
            let mut state = self.state.lock().await;
            let state = &mut *state;

            if let Err(err) = result {
                if newly_claimed && state.owners.release(&stream, handle) {
                    if let Some(session) = state.sessions.get_mut(&handle) {
                        session.disown(&stream);
                    }
                }
                tracing::warn!(client = %handle, stream = %stream, error = %err, "Stream start failed, ownership rolled back");
                return Err(err);
            }

            let live = state.sessions.contains_key(&handle);
            if live && state.owners.owner(&stream) == Some(handle) {
                if let Some(target) = notify {
                    state.fanout.subscribe(handle, EventKind::Streams(guid), target);
                }
                None
            } else {
                // Teardown, device removal or a device-side stop released the claim meanwhile
                if let Some(session) = state.sessions.get_mut(&handle) {
                    session.disown(&stream);
                }

                if let Err(owner) = state.owners.reserve_stop(stream, handle) {
                    tracing::warn!(client = %handle, stream = %stream, owner = %owner, "Stream taken over while starting");
                    return Err(if live {
                        BrokerError::StreamAlreadyOwned { stream, owner }
                    } else {
                        BrokerError::UnknownClient(handle)
                    });
                }

                Some(if !live {
                    BrokerError::UnknownClient(handle)
                } else if !self.registry.contains(guid).await {
                    BrokerError::UnknownDevice(guid)
                } else {
                    BrokerError::backend(guid, BackendError::failed("stream stopped by the device while starting"))
                })
            }
        };

        let Some(err) = lost else {
            tracing::info!(client = %handle, stream = %stream, "Stream started");
            return Ok(());
        };

        tracing::warn!(client = %handle, stream = %stream, "Ownership lost while starting, stopping stream");
        if let Err(e) = self
            .run_backend(guid, backend, move |b| b.stop_stream(scope, element))
            .await
        {
            tracing::warn!(stream = %stream, error = %e, "Failed to stop orphaned stream");
        }
        self.state.lock().await.owners.finish_stop(&stream, handle);

        Err(err)
    }

    /// Stop a stream the caller owns
    ///
    /// Fails with `NotOwner` if the caller does not own the endpoint.
    pub async fn stop_stream(
        &self,
        handle: ClientHandle,
        guid: Guid,
        scope: Scope,
        element: Element,
    ) -> Result<()> {
        let stream = StreamSpecifier::new(guid, scope, element);

        let backend = {
            let mut state = self.state.lock().await;
            let state = &mut *state;

            state.session_for_call(handle)?;
            let backend = self.registry.lookup(guid).await?;

            if !state.owners.release(&stream, handle) {
                return Err(BrokerError::NotOwner {
                    client: handle,
                    stream,
                });
            }
            if let Some(session) = state.sessions.get_mut(&handle) {
                session.disown(&stream);
            }
            backend
        };

        match self
            .run_backend(guid, backend, move |b| b.stop_stream(scope, element))
            .await
        {
            Ok(()) => {
                tracing::info!(client = %handle, stream = %stream, "Stream stopped");
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                let state = &mut *state;

                if let Some(session) = state.sessions.get_mut(&handle) {
                    if self.registry.contains(guid).await && state.owners.claim(stream, handle).is_ok() {
                        session.own(stream);
                    }
                }
                tracing::warn!(client = %handle, stream = %stream, error = %err, "Stream stop failed");
                Err(err)
            }
        }
    }

    /// Current owner of a stream endpoint
    pub async fn stream_owner(&self, guid: Guid, scope: Scope, element: Element) -> Option<ClientHandle> {
        let stream = StreamSpecifier::new(guid, scope, element);
        self.state.lock().await.owners.owner(&stream)
    }

    /// Execute a deck transport command on a stream endpoint
    ///
    /// Allowed when the endpoint is unowned or owned by the caller; deck
    /// commands never change ownership.
    pub async fn deck_command(
        &self,
        handle: ClientHandle,
        guid: Guid,
        scope: Scope,
        element: Element,
        command: DeckCommand,
    ) -> Result<()> {
        let stream = StreamSpecifier::new(guid, scope, element);

        let backend = {
            let mut state = self.state.lock().await;
            state.session_for_call(handle)?;
            let backend = self.registry.lookup(guid).await?;

            match state.owners.owner(&stream) {
                Some(owner) if owner != handle => {
                    return Err(BrokerError::NotOwner {
                        client: handle,
                        stream,
                    });
                }
                _ => backend,
            }
        };

        self.run_backend(guid, backend, move |b| b.deck(scope, element, command))
            .await?;

        tracing::debug!(client = %handle, stream = %stream, command = %command, "Deck command executed");
        Ok(())
    }

    pub async fn start_deck_threads(&self, handle: ClientHandle, guid: Guid, scope: Scope, element: Element) -> Result<()> {
        self.deck_command(handle, guid, scope, element, DeckCommand::StartThreads)
            .await
    }

    pub async fn stop_deck_threads(&self, handle: ClientHandle, guid: Guid, scope: Scope, element: Element) -> Result<()> {
        self.deck_command(handle, guid, scope, element, DeckCommand::StopThreads)
            .await
    }

    pub async fn deck_play(&self, handle: ClientHandle, guid: Guid, scope: Scope, element: Element) -> Result<()> {
        self.deck_command(handle, guid, scope, element, DeckCommand::Play)
            .await
    }

    pub async fn deck_stop(&self, handle: ClientHandle, guid: Guid, scope: Scope, element: Element) -> Result<()> {
        self.deck_command(handle, guid, scope, element, DeckCommand::Stop)
            .await
    }

    /// Shuttle the deck; `speed` is passed to the device unmodified
    pub async fn deck_jog(
        &self,
        handle: ClientHandle,
        guid: Guid,
        scope: Scope,
        element: Element,
        speed: i32,
    ) -> Result<()> {
        self.deck_command(handle, guid, scope, element, DeckCommand::Jog { speed })
            .await
    }

    /// Cue the deck to a timecode, optionally playing once cued
    pub async fn deck_cue_to(
        &self,
        handle: ClientHandle,
        guid: Guid,
        scope: Scope,
        element: Element,
        timecode: f64,
        play_on_cue: bool,
    ) -> Result<()> {
        self.deck_command(
            handle,
            guid,
            scope,
            element,
            DeckCommand::CueTo {
                timecode,
                play_on_cue,
            },
        )
        .await
    }
}
