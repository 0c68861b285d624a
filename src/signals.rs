//! Priority-ordered publish/subscribe bus.
//!
//! The bus is the extension seam of the compiler: host code subscribes to
//! named signals (`models[User].fields.beforeInit`, `allRoutes.created`, ...)
//! and receives a mutable reference to the payload, so it can rewrite the
//! compiled graph before it is used.
//!
//! # Ordering
//!
//! Handlers run in ascending priority. Equal priorities run in registration
//! order. A handler without an explicit priority gets [`DEFAULT_PRIORITY`],
//! which sorts after every finite user priority but before `f64::INFINITY`.
//!
//! # Failure isolation
//!
//! A handler returning an error (or panicking) is reported through the error
//! reporter and the remaining handlers still run. The emitter never sees it.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use schema_models::{SlotOptions, Signals};
//!
//! let signals = Signals::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//!
//! let log = seen.clone();
//! signals.on(SlotOptions::new("greet").priority(1.0), move |name: &mut String| {
//!     log.borrow_mut().push(format!("hello {}", name));
//!     Ok(())
//! });
//!
//! signals.emit("greet", &mut String::from("world"));
//! assert_eq!(*seen.borrow(), vec!["hello world".to_string()]);
//! ```

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, error};

/// Emitted when an application instance is created; clears sticky payloads.
pub const APP_CREATED: &str = "APP_CREATED";
/// Emitted before models are compiled.
pub const APP_BEFORE_INIT: &str = "app.beforeInit";
/// Emitted once models, views and routes are ready.
pub const APP_AFTER_INIT: &str = "app.afterInit";
/// Emitted after every definition has been compiled.
pub const SCHEMA_MODELS_CREATED: &str = "allModels.created";
/// Emitted with the complete route list.
pub const ALL_ROUTES_CREATED: &str = "allRoutes.created";

/// Priority of handlers registered without an explicit one.
pub const DEFAULT_PRIORITY: f64 = f64::MAX;

/// Error returned by a signal handler.
pub type HandlerError = Box<dyn std::error::Error>;

/// Result returned by a signal handler.
pub type HandlerResult = Result<(), HandlerError>;

/// Signal emitted with the field mapping of a model before it is frozen.
pub fn model_fields_before_init(model: &str) -> String {
    format!("models[{}].fields.beforeInit", model)
}

/// Signal emitted after a model descriptor is created.
pub fn model_created(model: &str) -> String {
    format!("models[{}].created", model)
}

/// Signal emitted for every generated route.
pub fn route_created(route: &str) -> String {
    format!("routes[{}].created", route)
}

type Callback = Rc<dyn Fn(&mut dyn Any) -> HandlerResult>;
type Reporter = Box<dyn Fn(&str, &str, &HandlerError)>;

/// Registration options for [`Signals::on`].
#[derive(Debug, Clone)]
pub struct SlotOptions {
    pub signal: String,
    pub slot: Option<String>,
    pub priority: Option<f64>,
    pub once: bool,
}

impl SlotOptions {
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            slot: None,
            priority: None,
            once: false,
        }
    }

    /// Use a caller-chosen slot token instead of a generated one.
    pub fn slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    /// Lower priorities run first.
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Remove the handler after its first invocation.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

struct Subscriber {
    id: u64,
    slot: String,
    priority: f64,
    once: bool,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<String, Vec<Subscriber>>,
    sticky: HashMap<String, Box<dyn Any>>,
    next_id: u64,
}

/// Publish/subscribe registry owned by one application instance.
#[derive(Default)]
pub struct Signals {
    registry: RefCell<Registry>,
    reporter: RefCell<Option<Reporter>>,
}

impl std::fmt::Debug for Signals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.borrow();
        f.debug_struct("Signals")
            .field("signals", &registry.subscribers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and return its slot token.
    ///
    /// The handler is invoked only for emissions whose payload type is `T`;
    /// any other payload type is reported as a handler error.
    pub fn on<T, F>(&self, options: SlotOptions, callback: F) -> String
    where
        T: 'static,
        F: Fn(&mut T) -> HandlerResult + 'static,
    {
        let signal = options.signal.clone();
        let callback: Callback = Rc::new(move |args: &mut dyn Any| match args.downcast_mut::<T>() {
            Some(args) => callback(args),
            None => Err(format!("handler expects payload of type {}", type_name::<T>()).into()),
        });

        let mut registry = self.registry.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        let slot = options.slot.unwrap_or_else(|| format!("sig{}", id));
        let priority = match options.priority {
            Some(p) if !p.is_nan() => p,
            _ => DEFAULT_PRIORITY,
        };

        let subscribers = registry.subscribers.entry(signal).or_default();
        // Stable: a new handler goes after every handler of equal priority.
        let position = subscribers.partition_point(|s| s.priority <= priority);
        subscribers.insert(
            position,
            Subscriber {
                id,
                slot: slot.clone(),
                priority,
                once: options.once,
                callback,
            },
        );
        slot
    }

    /// Register a handler with the default priority.
    pub fn connect<T, F>(&self, signal: &str, callback: F) -> String
    where
        T: 'static,
        F: Fn(&mut T) -> HandlerResult + 'static,
    {
        self.on(SlotOptions::new(signal), callback)
    }

    /// Register a handler that fires on the next emission only.
    pub fn once<T, F>(&self, signal: &str, callback: F) -> String
    where
        T: 'static,
        F: Fn(&mut T) -> HandlerResult + 'static,
    {
        self.on(SlotOptions::new(signal).once(), callback)
    }

    /// Remove the handler registered under `slot` for `signal`.
    ///
    /// Returns `true` if a handler was removed.
    pub fn disconnect(&self, slot: &str, signal: &str) -> bool {
        let mut registry = self.registry.borrow_mut();
        let Some(subscribers) = registry.subscribers.get_mut(signal) else {
            return false;
        };
        match subscribers.iter().position(|s| s.slot == slot) {
            Some(idx) => {
                subscribers.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Number of handlers currently subscribed to `signal`.
    pub fn subscriber_count(&self, signal: &str) -> usize {
        self.registry
            .borrow()
            .subscribers
            .get(signal)
            .map_or(0, Vec::len)
    }

    /// Replace the reporter that receives handler errors.
    ///
    /// The reporter gets the signal name, the slot token and the error.
    pub fn set_error_reporter<F>(&self, reporter: F)
    where
        F: Fn(&str, &str, &HandlerError) + 'static,
    {
        *self.reporter.borrow_mut() = Some(Box::new(reporter));
    }

    /// Invoke every handler of `signal` synchronously, in priority order.
    ///
    /// Handlers may subscribe, disconnect and emit while the emission runs.
    /// A handler disconnected mid-emission is skipped; a `once` handler is
    /// removed before it runs, so a nested emission never invokes it again.
    pub fn emit<T: 'static>(&self, signal: &str, args: &mut T) {
        let queue: Vec<u64> = match self.registry.borrow().subscribers.get(signal) {
            Some(subscribers) => subscribers.iter().map(|s| s.id).collect(),
            None => {
                debug!(signal, "signal has no subscribers");
                return;
            }
        };

        for id in queue {
            let (slot, callback) = {
                let mut registry = self.registry.borrow_mut();
                let Some(subscribers) = registry.subscribers.get_mut(signal) else {
                    break;
                };
                let Some(idx) = subscribers.iter().position(|s| s.id == id) else {
                    continue;
                };
                if subscribers[idx].once {
                    let subscriber = subscribers.remove(idx);
                    (subscriber.slot, subscriber.callback)
                } else {
                    let subscriber = &subscribers[idx];
                    (subscriber.slot.clone(), subscriber.callback.clone())
                }
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&mut *args as &mut dyn Any)));
            let failure: Option<HandlerError> = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(panic_message(panic).into()),
            };
            if let Some(e) = failure {
                self.report(signal, &slot, &e);
            }
        }
    }

    /// Emit `args` and remember a copy for handlers registered later with
    /// [`Signals::when_emitted`].
    pub fn emit_sticky<T: Clone + 'static>(&self, signal: &str, args: &mut T) {
        if signal == APP_CREATED {
            self.registry.borrow_mut().sticky.clear();
        }
        self.emit(signal, args);
        self.registry
            .borrow_mut()
            .sticky
            .insert(signal.to_string(), Box::new(args.clone()));
    }

    /// Run `callback` with the remembered payload of `signal`, or once on its
    /// next sticky emission if it has not been emitted yet.
    pub fn when_emitted<T, F>(&self, signal: &str, callback: F)
    where
        T: Clone + 'static,
        F: Fn(&mut T) -> HandlerResult + 'static,
    {
        let remembered = self
            .registry
            .borrow()
            .sticky
            .get(signal)
            .and_then(|args| args.downcast_ref::<T>())
            .cloned();

        match remembered {
            Some(mut args) => {
                if let Err(e) = callback(&mut args) {
                    self.report(signal, "replay", &e);
                }
            }
            None => {
                self.once(signal, callback);
            }
        }
    }

    /// Whether `signal` has a remembered sticky payload.
    pub fn was_emitted(&self, signal: &str) -> bool {
        self.registry.borrow().sticky.contains_key(signal)
    }

    fn report(&self, signal: &str, slot: &str, e: &HandlerError) {
        match &*self.reporter.borrow() {
            Some(reporter) => reporter(signal, slot, e),
            None => error!(signal, slot, error = %e, "signal handler failed"),
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
