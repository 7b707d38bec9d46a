//! Notification channel boundary and the alert renderers shared by channels.

pub mod email;
pub mod render;
pub mod sms;

use crate::diff::Delta;
use thiserror::Error;

pub use email::{EmailChannel, SmtpSettings};
pub use sms::{SmsChannel, TwilioSettings};

/// Failure of a single notification channel. Never fatal for a run.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An address or phone number was rejected before sending.
    #[error("invalid recipient {recipient:?}: {reason}")]
    InvalidRecipient {
        /// Offending value.
        recipient: String,
        /// Parser complaint.
        reason: String,
    },
    /// The message could not be assembled.
    #[error("failed to build message: {0}")]
    Message(String),
    /// The remote side refused or could not be reached.
    #[error("delivery failed: {0}")]
    Delivery(String),
    /// Some recipients were reached and some were not.
    #[error("delivered to {sent} recipient(s), {failed} failed")]
    Partial {
        /// Recipients reached.
        sent: usize,
        /// Recipients not reached.
        failed: usize,
    },
}

impl ChannelError {
    /// Recipients reached despite the failure.
    pub fn sent(&self) -> usize {
        match self {
            Self::Partial { sent, .. } => *sent,
            _ => 0,
        }
    }
}

/// Something that can deliver an alert for a delta.
pub trait NotificationChannel {
    /// Short channel name for logs and reports.
    fn name(&self) -> &str;

    /// Delivers the whole delta, returning how many recipients were reached.
    fn notify(&self, delta: &Delta) -> Result<usize, ChannelError>;
}

impl<T: NotificationChannel + ?Sized> NotificationChannel for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn notify(&self, delta: &Delta) -> Result<usize, ChannelError> {
        (**self).notify(delta)
    }
}
