//! Fan-out of chat events to listeners.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::event::ChatListener;
use crate::irc::ChatEvent;
use crate::users::UserResolver;

pub struct Dispatcher {
    resolver: Arc<dyn UserResolver>,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn UserResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve the sender and hand the message to every listener, in order.
    ///
    /// Returns how many listeners completed. An unknown sender or a failed
    /// lookup drops the event without surfacing an error. A panicking
    /// listener is logged and skipped.
    pub async fn dispatch(&self, event: &ChatEvent, listeners: &[Arc<dyn ChatListener>]) -> usize {
        if listeners.is_empty() {
            tracing::trace!(channel = %event.channel, "No listeners, skipping");
            return 0;
        }

        let profile = match self.resolver.resolve(&event.sender).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::debug!(sender = %event.sender, "Unknown sender, dropping message");
                return 0;
            }
            Err(e) => {
                tracing::warn!(sender = %event.sender, error = %e, "Sender lookup failed, dropping message");
                return 0;
            }
        };

        tracing::trace!(channel = %event.channel, message = %event.text, "Invoking listeners");
        let mut delivered = 0;
        for listener in listeners {
            let call = || listener.on_message_received(&profile, &event.text, &event.emotes);
            match catch_unwind(AssertUnwindSafe(call)) {
                Ok(()) => delivered += 1,
                Err(panic) => tracing::warn!(
                    channel = %event.channel,
                    sender = %event.sender,
                    panic = panic_message(panic.as_ref()),
                    "Listener panicked"
                ),
            }
        }
        delivered
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::BoxFuture;
    use crate::users::UserProfile;

    struct KnownUsers {
        calls: AtomicUsize,
    }

    impl UserResolver for KnownUsers {
        fn resolve<'a>(&'a self, login: &'a str) -> BoxFuture<'a, anyhow::Result<Option<UserProfile>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                match login {
                    "ghost" => Ok(None),
                    "broken" => anyhow::bail!("lookup exploded"),
                    _ => Ok(Some(UserProfile {
                        id: "1".into(),
                        login: login.into(),
                        display_name: login.to_uppercase(),
                        ..Default::default()
                    })),
                }
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, String, String)>>,
    }

    impl ChatListener for Recorder {
        fn on_message_received(&self, user: &UserProfile, message: &str, emotes: &str) {
            self.seen
                .lock()
                .push((user.display_name.clone(), message.to_string(), emotes.to_string()));
        }
    }

    fn event(sender: &str) -> ChatEvent {
        ChatEvent {
            channel: "chan".into(),
            text: "Hello Kappa".into(),
            emotes: "25:6-10".into(),
            sender: sender.into(),
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<KnownUsers>) {
        let users = Arc::new(KnownUsers { calls: AtomicUsize::new(0) });
        (Dispatcher::new(users.clone()), users)
    }

    #[tokio::test]
    async fn invokes_listeners_with_profile() {
        let (dispatcher, _) = dispatcher();
        let rec = Arc::new(Recorder::default());
        let listeners: Vec<Arc<dyn ChatListener>> = vec![rec.clone()];

        assert_eq!(dispatcher.dispatch(&event("alice"), &listeners).await, 1);
        assert_eq!(
            *rec.seen.lock(),
            vec![("ALICE".to_string(), "Hello Kappa".to_string(), "25:6-10".to_string())]
        );
    }

    #[tokio::test]
    async fn invokes_in_registration_order() {
        let (dispatcher, _) = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        let listeners: Vec<Arc<dyn ChatListener>> = (0..3)
            .map(|i| {
                let order = order.clone();
                Arc::new(move |_: &UserProfile, _: &str, _: &str| order.lock().push(i))
                    as Arc<dyn ChatListener>
            })
            .collect();

        dispatcher.dispatch(&event("alice"), &listeners).await;
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn unknown_sender_is_dropped() {
        let (dispatcher, _) = dispatcher();
        let rec = Arc::new(Recorder::default());
        let listeners: Vec<Arc<dyn ChatListener>> = vec![rec.clone()];

        assert_eq!(dispatcher.dispatch(&event("ghost"), &listeners).await, 0);
        assert_eq!(dispatcher.dispatch(&event("broken"), &listeners).await, 0);
        assert!(rec.seen.lock().is_empty());
    }

    struct Faulty;

    impl ChatListener for Faulty {
        fn on_message_received(&self, _user: &UserProfile, _message: &str, _emotes: &str) {
            panic!("listener blew up");
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_the_rest() {
        let (dispatcher, _) = dispatcher();
        let rec = Arc::new(Recorder::default());
        let listeners: Vec<Arc<dyn ChatListener>> = vec![Arc::new(Faulty), rec.clone()];

        assert_eq!(dispatcher.dispatch(&event("alice"), &listeners).await, 1);
        assert_eq!(rec.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn no_listeners_skips_lookup() {
        let (dispatcher, users) = dispatcher();
        assert_eq!(dispatcher.dispatch(&event("alice"), &[]).await, 0);
        assert_eq!(users.calls.load(Ordering::SeqCst), 0);
    }
}
