use std::sync::mpsc::Sender;

/// Sent to the host after each repository change so it can refresh its view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub alarm_id: u64,
}

impl Message {
    #[must_use]
    pub const fn new(kind: MessageType, alarm_id: u64) -> Self {
        Self { kind, alarm_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Created,
    Updated,
    Deleted,
    // record and native schedule no longer agree
    Diverged { reason: String },
}

/// Sends if anyone is listening. A dropped receiver only means nobody cares
/// about refreshes anymore.
pub(crate) fn notify(sender: Option<&Sender<Message>>, kind: MessageType, alarm_id: u64) {
    if let Some(sender) = sender {
        if sender.send(Message::new(kind, alarm_id)).is_err() {
            log::debug!("no listener for alarm {alarm_id} change");
        }
    }
}
