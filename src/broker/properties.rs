//! Property, control and RS-422 calls
//!
//! All follow resolve-then-delegate: the caller and device are checked under
//! the state lock, the backend runs without it.

use bytes::Bytes;

use super::Broker;
use crate::device::{ControlChange, ControlInfo, Guid, PropertyAddress, RS422_MAX_LEN};
use crate::error::{BrokerError, Result};
use crate::notify::{DeliveryTarget, EventKind, Notification};
use crate::session::ClientHandle;

impl Broker {
    /// List the device's properties matching `match_address`
    ///
    /// With a target, the caller is subscribed to property changes on the device.
    pub async fn get_properties(
        &self,
        handle: ClientHandle,
        guid: Guid,
        match_address: PropertyAddress,
        notify: Option<DeliveryTarget>,
    ) -> Result<Vec<PropertyAddress>> {
        let backend = self.resolve(handle, guid).await?;
        let addresses = self
            .run_backend(guid, backend, move |b| b.properties(&match_address))
            .await?;

        if let Some(target) = notify {
            self.subscribe(handle, EventKind::Properties(guid), target).await?;
        }

        tracing::debug!(client = %handle, guid = %guid, matched = addresses.len(), "Properties listed");
        Ok(addresses)
    }

    /// Read a property value
    pub async fn get_property_state(
        &self,
        handle: ClientHandle,
        guid: Guid,
        address: PropertyAddress,
        qualifier: Bytes,
    ) -> Result<Bytes> {
        let backend = self.resolve(handle, guid).await?;
        self.run_backend(guid, backend, move |b| b.property_state(&address, &qualifier))
            .await
    }

    /// Write a property value
    ///
    /// With `send_changed_notifications`, a property-changed notification is
    /// published once the backend confirms the write, and never for a failed one.
    pub async fn set_property_state(
        &self,
        handle: ClientHandle,
        guid: Guid,
        address: PropertyAddress,
        qualifier: Bytes,
        data: Bytes,
        send_changed_notifications: bool,
    ) -> Result<()> {
        let backend = self.resolve(handle, guid).await?;
        self.run_backend(guid, backend, move |b| {
            b.set_property_state(&address, &qualifier, &data)
        })
        .await?;

        tracing::debug!(client = %handle, guid = %guid, address = %address, "Property set");

        if send_changed_notifications {
            self.publish(Notification::PropertiesChanged {
                guid,
                addresses: vec![address],
            })
            .await;
        }

        Ok(())
    }

    /// Describe the device's controls
    pub async fn get_control_list(&self, handle: ClientHandle, guid: Guid) -> Result<Vec<ControlInfo>> {
        let backend = self.resolve(handle, guid).await?;
        self.run_backend(guid, backend, |b| b.control_list()).await
    }

    /// Current values of the device's controls
    ///
    /// With a target, the caller is subscribed to control changes on the device.
    pub async fn get_controls(
        &self,
        handle: ClientHandle,
        guid: Guid,
        notify: Option<DeliveryTarget>,
    ) -> Result<Vec<ControlChange>> {
        let backend = self.resolve(handle, guid).await?;
        let controls = self.run_backend(guid, backend, |b| b.controls()).await?;

        if let Some(target) = notify {
            self.subscribe(handle, EventKind::Controls(guid), target).await?;
        }

        Ok(controls)
    }

    /// Set a control and return the value the device actually applied
    ///
    /// The applied value may differ from `value` (clamping); it is the one
    /// announced to control subscribers.
    pub async fn set_control(&self, handle: ClientHandle, guid: Guid, id: u32, value: u32) -> Result<u32> {
        let backend = self.resolve(handle, guid).await?;
        let applied = self
            .run_backend(guid, backend, move |b| b.set_control(id, value))
            .await?;

        tracing::debug!(
            client = %handle,
            guid = %guid,
            control = id,
            requested = value,
            applied = applied,
            "Control set"
        );

        self.publish(Notification::ControlsChanged {
            guid,
            changes: vec![ControlChange { id, value: applied }],
        })
        .await;

        Ok(applied)
    }

    /// Send an RS-422 command to the device
    ///
    /// Commands, requested response sizes and responses are limited to
    /// [`RS422_MAX_LEN`] bytes.
    pub async fn process_rs422_command(
        &self,
        handle: ClientHandle,
        guid: Guid,
        command: Bytes,
        response_len: u32,
    ) -> Result<Bytes> {
        let backend = self.resolve(handle, guid).await?;

        if command.len() > RS422_MAX_LEN {
            return Err(BrokerError::CommandTooLarge {
                len: command.len(),
                max: RS422_MAX_LEN,
            });
        }

        let response_len = response_len as usize;
        if response_len > RS422_MAX_LEN {
            return Err(BrokerError::ResponseTooLarge {
                len: response_len,
                max: RS422_MAX_LEN,
            });
        }

        let response = self
            .run_backend(guid, backend, move |b| b.rs422_command(&command, response_len))
            .await?;

        if response.len() > RS422_MAX_LEN {
            tracing::warn!(
                client = %handle,
                guid = %guid,
                len = response.len(),
                "RS-422 response exceeds limit"
            );
            return Err(BrokerError::ResponseTooLarge {
                len: response.len(),
                max: RS422_MAX_LEN,
            });
        }

        Ok(response)
    }
}
