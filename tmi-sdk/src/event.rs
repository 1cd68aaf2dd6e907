//! Consumer-facing callback for chat messages.

use std::sync::Arc;

use crate::users::UserProfile;

/// Receives chat messages for the channels it joined.
///
/// Callbacks run on the client's read loop, one at a time and in arrival
/// order. A callback that blocks stalls the whole connection; hand heavy work
/// off to a task or channel.
pub trait ChatListener: Send + Sync {
    fn on_message_received(&self, user: &UserProfile, message: &str, emotes: &str);
}

/// Listeners are compared by the address of their allocation.
pub(crate) fn same_listener(a: &Arc<dyn ChatListener>, b: &Arc<dyn ChatListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl<F> ChatListener for F
where
    F: Fn(&UserProfile, &str, &str) + Send + Sync,
{
    fn on_message_received(&self, user: &UserProfile, message: &str, emotes: &str) {
        self(user, message, emotes)
    }
}
