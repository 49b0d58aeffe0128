//! ==============================================================================
//! backend.rs - the gateway's ip-side client
//! ==============================================================================
//!
//! purpose:
//!     two calls against the backend: post one batch of readings, and ask
//!     whether a station has a pending command.
//!
//! contract:
//!     POST {base_url}{batch_path}            json array of UplinkRecord; any 2xx is success
//!     GET  {base_url}{command_path}/{id}     200 + PendingCommand json | 204 no command
//!
//!     every request is bounded by backend.timeout_ms. nothing retries; the
//!     next cycle is the retry.
//!
//! relationships:
//!     - used by: uplink.rs (post_batch), relay.rs (poll_command)
//!     - HttpBackend is the only real implementation; tests plug in fakes
//!
//! ==============================================================================

use std::future::Future;

use reqwest::StatusCode;

use crate::config::BackendConfig;
use crate::domain::{PendingCommand, SenderId, UplinkRecord};
use crate::error::BackendError;

/// Result of one command poll that the endpoint contract allows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPoll {
    Pending(PendingCommand),
    Empty,
}

pub trait Backend: Send + Sync + 'static {
    fn post_batch(
        &self,
        batch: &[UplinkRecord],
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn poll_command(
        &self,
        station_id: SenderId,
    ) -> impl Future<Output = Result<CommandPoll, BackendError>> + Send;
}

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    batch_url: String,
    command_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            batch_url: format!("{}{}", base, config.batch_path),
            command_url: format!("{}{}", base, config.command_path.trim_end_matches('/')),
        })
    }
}

impl Backend for HttpBackend {
    async fn post_batch(&self, batch: &[UplinkRecord]) -> Result<(), BackendError> {
        let response = self.client.post(&self.batch_url).json(batch).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn poll_command(&self, station_id: SenderId) -> Result<CommandPoll, BackendError> {
        let url = format!("{}/{}", self.command_url, station_id);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await?;
                let command: PendingCommand = serde_json::from_slice(&body)?;
                Ok(CommandPoll::Pending(command))
            }
            StatusCode::NO_CONTENT => Ok(CommandPoll::Empty),
            other => Err(BackendError::Status(other.as_u16())),
        }
    }
}
