//! One message's trip through the session.
//!
//! A delivery pauses briefly, transmits the text, then watches the screen
//! until the CLI settles on a ready prompt. The outcome comes back to the
//! orchestrator as a [`DeliveryEvent::Finished`]; nothing here touches the
//! queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::terminal::readiness::{wait_for_ready, RESPONSE_TIMEOUT};
use crate::transmit::{transmit, SessionLink};
use crate::{AppError, Result};

/// Pause between marking an item processing and writing it.
pub const SETTLE: Duration = Duration::from_millis(500);

/// Progress of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// The CLI is asking for permission while working on the message.
    PermissionPrompt {
        /// Item being delivered.
        message_id: String,
    },
    /// The delivery is over.
    Finished {
        /// Item that was delivered.
        message_id: String,
        /// `Ok` once the CLI is ready again.
        result: Result<()>,
    },
}

/// Deliver `text` and report the outcome on `events`.
#[must_use]
pub fn spawn_delivery<E>(
    message_id: String,
    text: String,
    link: Arc<dyn SessionLink>,
    output: broadcast::Sender<Arc<str>>,
    events: mpsc::Sender<E>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    E: From<DeliveryEvent> + Send + 'static,
{
    let span = info_span!("delivery", message_id = %message_id);
    tokio::spawn(
        async move {
            let result = deliver(&message_id, &text, link.as_ref(), &output, &events, &cancel).await;
            match &result {
                Ok(()) => info!("message processed"),
                Err(AppError::Cancelled(_)) => debug!("delivery cancelled"),
                Err(err) => warn!(%err, "message failed"),
            }
            let finished = DeliveryEvent::Finished { message_id, result };
            if events.send(E::from(finished)).await.is_err() {
                debug!("event channel closed before delivery outcome");
            }
        }
        .instrument(span),
    )
}

async fn deliver<E>(
    message_id: &str,
    text: &str,
    link: &dyn SessionLink,
    output: &broadcast::Sender<Arc<str>>,
    events: &mpsc::Sender<E>,
    cancel: &CancellationToken,
) -> Result<()>
where
    E: From<DeliveryEvent> + Send + 'static,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            return Err(AppError::Cancelled("delivery cancelled".into()));
        }
        () = tokio::time::sleep(SETTLE) => {}
    }

    transmit(link, text, cancel).await?;

    let prompt = DeliveryEvent::PermissionPrompt {
        message_id: message_id.to_owned(),
    };
    let events = events.clone();
    wait_for_ready(output.subscribe(), RESPONSE_TIMEOUT, cancel.clone(), move || {
        if events.try_send(E::from(prompt.clone())).is_err() {
            debug!("permission notice dropped");
        }
    })
    .await
}
