//! Update listener: registers every new chat user in the store.
//!
//! Updates are long-polled through a teloxide [`Dispatcher`] and handled
//! strictly one at a time, in delivery order. A lookup failure other than
//! "not found" is fatal to the current run; [`supervise`] decides whether
//! the listener is restarted.

use crate::storage::{StorageError, UserStore};
use crate::utils::listener_backoff;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::update_listeners;
use teloxide::RequestError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that stop a listener run
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Looking up a user failed for a reason other than absence
    #[error("Storage error while looking up user: {0}")]
    Storage(#[from] StorageError),
    /// The bot could not reach Telegram before polling started
    #[error("Failed to start polling: {0}")]
    Startup(#[source] RequestError),
}

/// What happened to a single inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The sender was new and has been stored
    Registered,
    /// The sender was already registered, nothing was written
    AlreadyKnown,
    /// A concurrent insert won the race for this identity
    DuplicateIgnored,
    /// The insert failed and was logged
    InsertFailed,
}

/// Registers message senders in the user store
pub struct Registrar {
    store: Arc<dyn UserStore>,
}

impl Registrar {
    /// Create a registrar writing to `store`
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Register `identity` with delivery `address` unless already known.
    ///
    /// Known identities are never rewritten. Insert failures are logged and
    /// swallowed.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::Storage` when the lookup fails with anything
    /// other than `StorageError::NotFound`.
    pub async fn register(
        &self,
        identity: i64,
        address: i64,
    ) -> Result<Registration, ListenerError> {
        match self.store.get_user(identity).await {
            Ok(_) => {
                debug!("User {identity} already registered");
                Ok(Registration::AlreadyKnown)
            }
            Err(StorageError::NotFound(_)) => {
                match self.store.insert_user(identity, address).await {
                    Ok(()) => {
                        info!("Registered user {} (chat {})", identity, address);
                        Ok(Registration::Registered)
                    }
                    Err(StorageError::Duplicate(_)) => {
                        warn!("User {identity} was registered concurrently, skipping insert");
                        Ok(Registration::DuplicateIgnored)
                    }
                    Err(e) => {
                        error!("Failed to register user {}: {}", identity, e);
                        Ok(Registration::InsertFailed)
                    }
                }
            }
            Err(e) => Err(ListenerError::Storage(e)),
        }
    }
}

/// Sender identity and chat address of a message, if it has a sender
#[must_use]
pub fn sender_of(msg: &Message) -> Option<(i64, i64)> {
    msg.from
        .as_ref()
        .map(|user| (user.id.0.cast_signed(), msg.chat.id.0))
}

/// Records the first fatal error of a run and signals the dispatcher to stop
#[derive(Default)]
struct RunFault {
    error: Mutex<Option<StorageError>>,
    tripped: CancellationToken,
}

impl RunFault {
    fn trip(&self, err: StorageError) {
        if let Ok(mut slot) = self.error.lock() {
            slot.get_or_insert(err);
        }
        self.tripped.cancel();
    }

    fn is_tripped(&self) -> bool {
        self.tripped.is_cancelled()
    }

    fn take(&self) -> Option<StorageError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

fn setup_handler() -> UpdateHandler<RequestError> {
    Update::filter_message().endpoint(handle_message)
}

async fn handle_message(
    msg: Message,
    registrar: Arc<Registrar>,
    fault: Arc<RunFault>,
) -> Result<(), RequestError> {
    // Events still queued after a fatal error are dropped
    if fault.is_tripped() {
        return respond(());
    }

    let Some((identity, address)) = sender_of(&msg) else {
        debug!("Ignoring message {} without sender", msg.id.0);
        return respond(());
    };

    match registrar.register(identity, address).await {
        Ok(_) => {}
        Err(ListenerError::Storage(e)) => {
            error!("Listener stopping after storage failure: {}", e);
            fault.trip(e);
        }
        Err(e) => error!("Unexpected listener error: {}", e),
    }
    respond(())
}

/// Run the listener until `shutdown` is cancelled or a fatal error occurs.
///
/// # Errors
///
/// Returns `ListenerError::Startup` if the initial `getMe` call fails, and
/// `ListenerError::Storage` if a user lookup failed during the run.
pub async fn run_listener(
    bot: Bot,
    registrar: Arc<Registrar>,
    shutdown: CancellationToken,
) -> Result<(), ListenerError> {
    let fault = Arc::new(RunFault::default());

    let mut dispatcher = Dispatcher::builder(bot.clone(), setup_handler())
        .dependencies(dptree::deps![registrar, Arc::clone(&fault)])
        // One queue for every update keeps processing sequential
        .distribution_function(|_| Some(()))
        .default_handler(|_| async {})
        .build();

    let stop = dispatcher.shutdown_token();
    let tripped = fault.tripped.clone();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tripped.cancelled() => {}
        }
        // The dispatcher may not be polling yet; retry until it accepts
        loop {
            match stop.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    });

    info!("Update listener is running...");
    let polling = update_listeners::polling_default(bot).await;
    let started = dispatcher
        .try_dispatch_with_listener(
            polling,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;
    watcher.abort();

    if let Err(e) = started {
        error!("Update listener could not start: {}", e);
        return Err(ListenerError::Startup(e));
    }

    match fault.take() {
        Some(e) => Err(ListenerError::Storage(e)),
        None => {
            info!("Update listener stopped");
            Ok(())
        }
    }
}

/// Restart limits for the listener
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Restarts allowed after fatal errors, zero means fail-fast
    pub max_restarts: u32,
    /// Delay before the first restart, grows exponentially
    pub initial_backoff_ms: u64,
}

/// Why supervision ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Shutdown was requested or the listener exited cleanly
    Stopped,
    /// The listener kept failing and the restart budget is spent
    GaveUp {
        /// Restarts performed before giving up
        restarts: u32,
    },
}

/// Run `run` repeatedly until it exits cleanly, shutdown is requested, or
/// the restart budget of `policy` is exhausted.
pub async fn supervise_with<F, Fut>(
    policy: RestartPolicy,
    shutdown: CancellationToken,
    mut run: F,
) -> SupervisorExit
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ListenerError>>,
{
    let mut delays = listener_backoff(policy.initial_backoff_ms, policy.max_restarts);
    let mut restarts = 0;

    loop {
        let err = match run().await {
            Ok(()) => return SupervisorExit::Stopped,
            Err(e) => e,
        };
        if shutdown.is_cancelled() {
            return SupervisorExit::Stopped;
        }

        let Some(delay) = delays.next() else {
            error!(
                "Update listener failed and will not be restarted (restarts: {}): {}",
                restarts, err
            );
            return SupervisorExit::GaveUp { restarts };
        };

        restarts += 1;
        warn!(
            "Update listener failed: {}. Restart {}/{} in {:?}",
            err, restarts, policy.max_restarts, delay
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown.cancelled() => return SupervisorExit::Stopped,
        }
    }
}

/// Run the Telegram listener under supervision.
pub async fn supervise(
    bot: Bot,
    registrar: Arc<Registrar>,
    policy: RestartPolicy,
    shutdown: CancellationToken,
) -> SupervisorExit {
    let token = shutdown.clone();
    supervise_with(policy, shutdown, || {
        run_listener(bot.clone(), Arc::clone(&registrar), token.clone())
    })
    .await
}
