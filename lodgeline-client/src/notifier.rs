use shared::models::{ConversationId, MessageId, MessagePayload};

/// A desktop notification for a message addressed to the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub title: String,
    pub body: String,
    /// Where activating the notification navigates to.
    pub route: String,
}

impl Notification {
    /// Notification for an incoming message, routed to its conversation.
    #[must_use]
    pub fn for_message(payload: &MessagePayload) -> Self {
        let conversation_id = payload.conversation_id();
        Self {
            message_id: payload.id,
            conversation_id,
            title: format!("New message from {}", payload.sender.display_name),
            body: payload
                .conversation
                .last_message_preview
                .clone()
                .unwrap_or_else(|| payload.content.clone()),
            route: format!("/conversations/{conversation_id}"),
        }
    }
}

/// Platform hooks for raising notifications.
pub trait Notifier: Send + Sync {
    /// Whether the user is looking elsewhere.
    fn is_backgrounded(&self) -> bool;
    fn permission_granted(&self) -> bool;
    fn notify(&self, notification: Notification);
}

/// Never notifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn is_backgrounded(&self) -> bool {
        false
    }

    fn permission_granted(&self) -> bool {
        false
    }

    fn notify(&self, _notification: Notification) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::payload;

    #[test]
    fn notification_routes_to_conversation() {
        let notification = Notification::for_message(&payload(11, 5, 0));

        assert_eq!(notification.route, "/conversations/5");
        assert_eq!(notification.title, "New message from Ana");
        assert_eq!(notification.body, "message 11");
        assert_eq!(notification.message_id, 11);
    }
}
