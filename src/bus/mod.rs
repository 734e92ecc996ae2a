//! Message bus connecting the pipeline stages.
//!
//! The bus is a registry of named FIFO queues. Each queue is created for one
//! message type; the type is part of every `send`/`receive` call and a
//! mismatch is reported as a wiring error instead of a runtime surprise later
//! in the pipeline.
//!
//! # Queues
//!
//! | Name      | Message          | Producer                      | Consumer        |
//! |-----------|------------------|-------------------------------|-----------------|
//! | `in`      | `Build`          | web adapter, build tracker    | build tracker   |
//! | `out`     | `Build`          | build tracker                 | pipe → `hook`   |
//! | `hook`    | `TaskEnv`        | pipe, listener adapters       | task hook       |
//! | `monitor` | `MonitorMessage` | task hook                     | task monitor    |
//!
//! # Usage
//!
//! ```ignore
//! let mut bus = MessageBus::new();
//! bus.create_queue::<Build>(QUEUE_IN, None)?;
//! let bus = Arc::new(bus);
//!
//! bus.send(QUEUE_IN, build).await?;
//! let build: Build = bus.receive(QUEUE_IN).await?;
//! ```

mod queue;

use crate::errors::BusError;
use queue::Queue;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

/// Builds waiting for a visibility decision.
pub const QUEUE_IN: &str = "in";
/// Builds confirmed public.
pub const QUEUE_OUT: &str = "out";
/// Environment payloads waiting to trigger a hook.
pub const QUEUE_HOOK: &str = "hook";
/// Triggered tasks handed to the monitor.
pub const QUEUE_MONITOR: &str = "monitor";

/// Registry of named, typed FIFO queues.
///
/// Queues are registered with `&mut self` during setup; afterwards the bus is
/// usually shared behind an `Arc` and only `send`/`receive` are used.
#[derive(Default)]
pub struct MessageBus {
    queues: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl MessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new queue carrying messages of type `T`.
    ///
    /// `capacity` of `None` creates an unbounded queue; otherwise senders
    /// suspend once `capacity` messages are waiting.
    pub fn create_queue<T: Send + 'static>(
        &mut self,
        name: &str,
        capacity: Option<usize>,
    ) -> Result<(), BusError> {
        if self.queues.contains_key(name) {
            return Err(BusError::DuplicateQueue(name.to_string()));
        }
        if capacity == Some(0) {
            return Err(BusError::InvalidCapacity {
                queue: name.to_string(),
                capacity: 0,
            });
        }
        self.queues
            .insert(name.to_string(), Box::new(Queue::<T>::new(capacity)));
        debug!(queue = name, ?capacity, "Created bus queue");
        Ok(())
    }

    /// Number of registered queues.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Check whether a queue name is registered.
    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    fn queue<T: Send + 'static>(&self, name: &str) -> Result<&Queue<T>, BusError> {
        let queue = self
            .queues
            .get(name)
            .ok_or_else(|| BusError::UnknownQueue(name.to_string()))?;
        queue
            .downcast_ref::<Queue<T>>()
            .ok_or_else(|| BusError::MessageType {
                queue: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Check that `name` is registered for messages of type `T`.
    pub fn expect_queue<T: Send + 'static>(&self, name: &str) -> Result<(), BusError> {
        self.queue::<T>(name).map(|_| ())
    }

    /// Enqueue a message, suspending while a bounded queue is full.
    pub async fn send<T: Send + 'static>(&self, name: &str, message: T) -> Result<(), BusError> {
        self.queue::<T>(name)?
            .send(message)
            .await
            .map_err(|_| BusError::Closed(name.to_string()))
    }

    /// Dequeue the oldest message, suspending until one is available.
    pub async fn receive<T: Send + 'static>(&self, name: &str) -> Result<T, BusError> {
        self.queue::<T>(name)?
            .receive()
            .await
            .ok_or_else(|| BusError::Closed(name.to_string()))
    }

    /// Dequeue the oldest message without suspending.
    pub fn try_receive<T: Send + 'static>(&self, name: &str) -> Result<Option<T>, BusError> {
        Ok(self.queue::<T>(name)?.try_receive())
    }

    /// Number of messages waiting on a queue.
    pub fn len<T: Send + 'static>(&self, name: &str) -> Result<usize, BusError> {
        Ok(self.queue::<T>(name)?.len())
    }

    /// Configured capacity of a queue (`None` for unbounded).
    pub fn capacity<T: Send + 'static>(&self, name: &str) -> Result<Option<usize>, BusError> {
        Ok(self.queue::<T>(name)?.capacity())
    }

    /// Pass messages from `input` to `output` through `transform`, forever.
    ///
    /// A transform returning `None` consumes the input message without
    /// sending anything. Only wiring errors end the loop.
    pub async fn pipe<I, O, F, Fut>(
        &self,
        input: &str,
        output: &str,
        mut transform: F,
    ) -> Result<(), BusError>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Option<O>>,
    {
        self.expect_queue::<I>(input)?;
        self.expect_queue::<O>(output)?;

        loop {
            self.pipe_step(input, output, &mut transform).await?;
        }
    }

    /// Move a single message through `transform`. Returns whether something was sent.
    async fn pipe_step<I, O, F, Fut>(
        &self,
        input: &str,
        output: &str,
        transform: &mut F,
    ) -> Result<bool, BusError>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: FnMut(I) -> Fut,
        Fut: Future<Output = Option<O>>,
    {
        let message: I = self.receive(input).await?;
        match transform(message).await {
            Some(converted) => {
                self.send(output, converted).await?;
                Ok(true)
            }
            None => {
                debug!(input, output, "Skipping new message creation: no result");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_queue_creation() {
        let mut bus = MessageBus::new();
        assert_eq!(bus.queue_count(), 0);

        bus.create_queue::<String>("test", None).unwrap();
        assert_eq!(bus.queue_count(), 1);

        let err = bus.create_queue::<String>("test", None).unwrap_err();
        assert_eq!(err.to_string(), "Queue test already setup");
        assert_eq!(bus.queue_count(), 1);

        bus.create_queue::<u32>("another", Some(4)).unwrap();
        assert_eq!(bus.queue_count(), 2);
        assert!(bus.has_queue("another"));
        assert_eq!(bus.capacity::<u32>("another").unwrap(), Some(4));
        assert_eq!(bus.capacity::<String>("test").unwrap(), None);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut bus = MessageBus::new();
        let err = bus.create_queue::<String>("test", Some(0)).unwrap_err();
        assert!(matches!(err, BusError::InvalidCapacity { capacity: 0, .. }));
        assert!(!bus.has_queue("test"));
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let bus = MessageBus::new();
        let err = bus.send("missing", 1u32).await.unwrap_err();
        assert!(matches!(err, BusError::UnknownQueue(ref name) if name == "missing"));

        let err = bus.receive::<u32>("missing").await.unwrap_err();
        assert!(matches!(err, BusError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn test_wrong_message_type() {
        let mut bus = MessageBus::new();
        bus.create_queue::<String>("test", None).unwrap();

        let err = bus.send("test", 42u32).await.unwrap_err();
        assert!(matches!(err, BusError::MessageType { ref queue, .. } if queue == "test"));
        assert_eq!(bus.len::<String>("test").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_message_passing_is_fifo() {
        let mut bus = MessageBus::new();
        bus.create_queue::<String>("test", None).unwrap();

        bus.send("test", "payload".to_string()).await.unwrap();
        bus.send("test", "deadbeef".to_string()).await.unwrap();
        bus.send("test", "covfefe".to_string()).await.unwrap();
        assert_eq!(bus.len::<String>("test").unwrap(), 3);

        assert_eq!(bus.receive::<String>("test").await.unwrap(), "payload");
        assert_eq!(bus.receive::<String>("test").await.unwrap(), "deadbeef");
        assert_eq!(bus.receive::<String>("test").await.unwrap(), "covfefe");
        assert_eq!(bus.len::<String>("test").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_try_receive_does_not_suspend() {
        let mut bus = MessageBus::new();
        bus.create_queue::<u32>("test", None).unwrap();

        assert_eq!(bus.try_receive::<u32>("test").unwrap(), None);
        bus.send("test", 7u32).await.unwrap();
        assert_eq!(bus.try_receive::<u32>("test").unwrap(), Some(7));
        assert_eq!(bus.len::<u32>("test").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_waits_for_a_message() {
        let mut bus = MessageBus::new();
        bus.create_queue::<u32>("test", None).unwrap();
        let bus = Arc::new(bus);

        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.receive::<u32>("test").await })
        };
        tokio::task::yield_now().await;
        assert!(!consumer.is_finished());

        bus.send("test", 12u32).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap(), 12);
    }

    #[tokio::test]
    async fn test_bounded_queue_applies_back_pressure() {
        let mut bus = MessageBus::new();
        bus.create_queue::<u32>("test", Some(1)).unwrap();
        let bus = Arc::new(bus);

        bus.send("test", 1u32).await.unwrap();

        // Second send suspends until the first message is consumed
        let blocked = tokio::time::timeout(Duration::from_millis(50), bus.send("test", 2u32)).await;
        assert!(blocked.is_err());

        let producer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.send("test", 3u32).await })
        };
        assert_eq!(bus.receive::<u32>("test").await.unwrap(), 1);
        producer.await.unwrap().unwrap();
        assert_eq!(bus.receive::<u32>("test").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shared_consumers_each_message_delivered_once() {
        let mut bus = MessageBus::new();
        bus.create_queue::<u32>("test", None).unwrap();
        let bus = Arc::new(bus);

        for i in 0..10u32 {
            bus.send("test", i).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..2 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..5 {
                    seen.push(bus.receive::<u32>("test").await.unwrap());
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_pipe_step_converts_messages() {
        let mut bus = MessageBus::new();
        bus.create_queue::<String>("input", None).unwrap();
        bus.create_queue::<String>("output", None).unwrap();

        bus.send("input", "test x".to_string()).await.unwrap();
        bus.send("input", "hello world.".to_string()).await.unwrap();
        bus.send("output", "lowercase".to_string()).await.unwrap();

        let mut upper = |s: String| async move { Some(s.to_uppercase()) };
        assert!(bus.pipe_step("input", "output", &mut upper).await.unwrap());
        assert!(bus.pipe_step("input", "output", &mut upper).await.unwrap());
        assert_eq!(bus.len::<String>("input").unwrap(), 0);

        assert_eq!(bus.receive::<String>("output").await.unwrap(), "lowercase");
        assert_eq!(bus.receive::<String>("output").await.unwrap(), "TEST X");
        assert_eq!(bus.receive::<String>("output").await.unwrap(), "HELLO WORLD.");
    }

    #[tokio::test]
    async fn test_pipe_without_result_consumes_input() {
        let mut bus = MessageBus::new();
        bus.create_queue::<u32>("input", None).unwrap();
        bus.create_queue::<u32>("output", None).unwrap();
        let bus = Arc::new(bus);

        for i in 0..5u32 {
            bus.send("input", i).await.unwrap();
        }

        let runner = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.pipe("input", "output", |_: u32| async { None::<u32> })
                    .await
            })
        };

        while bus.len::<u32>("input").unwrap() > 0 {
            tokio::task::yield_now().await;
        }
        runner.abort();

        assert_eq!(bus.len::<u32>("output").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pipe_fails_fast_on_unknown_output() {
        let mut bus = MessageBus::new();
        bus.create_queue::<u32>("input", None).unwrap();

        let err = bus
            .pipe("input", "nowhere", |x: u32| async move { Some(x) })
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownQueue(ref name) if name == "nowhere"));
    }
}
