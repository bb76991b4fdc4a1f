use std::future::Future;

use log::{error, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const ACTOR_CHANNEL_SIZE: usize = 8;

/// An event-driven actor running on its own Tokio task.
/// All state mutation happens inside `receive`, so the actor state
/// needs no locking. Long-running work must be moved off the event
/// loop with [`ActorContext::spawn`].
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;

    fn new(options: Self::Options) -> Self;
    fn start(&mut self, ctx: &mut ActorContext<Self>);
    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: Self::Message) -> ActorAction;
    fn stop(self);
}

pub enum ActorAction {
    Continue,
    /// Log a warning and continue processing messages.
    Warn(String),
    /// Log an error and stop the actor.
    Fail(String),
    Stop,
}

impl ActorAction {
    pub fn warn(message: impl ToString) -> Self {
        Self::Warn(message.to_string())
    }

    pub fn fail(message: impl ToString) -> Self {
        Self::Fail(message.to_string())
    }
}

#[derive(Debug, Error)]
#[error("failed to send message to actor")]
pub struct ActorSendError;

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::Sender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn new(options: T::Options) -> Self {
        let (tx, mut rx) = mpsc::channel(ACTOR_CHANNEL_SIZE);
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let mut actor = T::new(options);
        let out = Self {
            sender: tx,
            stopped: stopped_rx,
        };
        let mut ctx = ActorContext::new(&out);
        tokio::spawn(async move {
            actor.start(&mut ctx);
            while let Some(message) = rx.recv().await {
                match actor.receive(&mut ctx, message) {
                    ActorAction::Continue => {}
                    ActorAction::Warn(message) => {
                        warn!("{message}");
                    }
                    ActorAction::Fail(message) => {
                        error!("{message}");
                        break;
                    }
                    ActorAction::Stop => break,
                }
            }
            actor.stop();
            let _ = stopped_tx.send(true);
        });
        out
    }

    pub async fn send(&self, message: T::Message) -> Result<(), ActorSendError> {
        self.sender.send(message).await.map_err(|_| ActorSendError)
    }

    pub async fn wait_for_stop(mut self) {
        // We ignore the receiver error since the sender must have been dropped in this case,
        // which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }
}

/// The context passed to actor callbacks. It gives access to the
/// actor's own handle and lets handlers move asynchronous work off
/// the event loop.
pub struct ActorContext<T>
where
    T: Actor,
{
    handle: ActorHandle<T>,
}

impl<T: Actor> ActorContext<T> {
    fn new(handle: &ActorHandle<T>) -> Self {
        Self {
            handle: handle.clone(),
        }
    }

    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    pub fn spawn<F>(&mut self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }

    /// Sends a message to the actor itself without blocking the event loop.
    /// The message is silently dropped if the actor has stopped.
    pub fn send(&mut self, message: T::Message) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let _ = handle.send(message).await;
        });
    }
}

/// A collection of actors whose termination can be awaited together.
pub struct ActorSystem {
    stopped: Vec<watch::Receiver<bool>>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        Self { stopped: vec![] }
    }

    pub fn spawn<T: Actor>(&mut self, options: T::Options) -> ActorHandle<T> {
        let handle = ActorHandle::<T>::new(options);
        self.stopped.push(handle.stopped.clone());
        handle
    }

    pub async fn join(self) {
        for mut stopped in self.stopped {
            let _ = stopped.wait_for(|x| *x).await;
        }
    }
}
