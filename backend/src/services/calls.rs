//! Call signaling passthrough. Offer, answer, ICE and hang-up payloads are
//! opaque and forwarded to the other member of the pair; nothing is buffered
//! for a peer that is not connected.

use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::models::ServerEvent;
use super::router::{Delivery, RelayTarget, SessionRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSignal {
    Offer,
    Answer,
    /// ICE candidates and any other mid-call exchange
    Signal,
    End,
}

impl CallSignal {
    fn into_event(self, from: String, payload: Value) -> ServerEvent {
        match self {
            CallSignal::Offer => ServerEvent::CallOffer { from, payload },
            CallSignal::Answer => ServerEvent::CallAnswer { from, payload },
            CallSignal::Signal => ServerEvent::CallSignal { from, payload },
            CallSignal::End => ServerEvent::CallEnd { from, payload },
        }
    }
}

pub struct CallSignalRelay {
    router: Arc<SessionRouter>,
}

impl CallSignalRelay {
    pub fn new(router: Arc<SessionRouter>) -> Self {
        Self { router }
    }

    pub fn forward(
        &self,
        sender: &str,
        target: &RelayTarget,
        signal: CallSignal,
        payload: Value,
    ) -> Result<Delivery> {
        let delivery = self
            .router
            .relay(sender, target, |_| signal.into_event(sender.to_string(), payload))?;

        if delivery == Delivery::RecipientOffline {
            warn!("Call {:?} from {} dropped, peer not connected", signal, sender);
        }
        Ok(delivery)
    }
}
