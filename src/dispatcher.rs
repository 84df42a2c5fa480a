//! Host Callback Dispatcher
//!
//! Maps host context ids to the guest's context instances and routes every
//! exported `proxy_on_*` entry point to the matching trait method.
//!
//! A VM is driven by a single thread, so all state is thread-local. Contexts
//! are held in a closed [`Slot`] enum; every entry point matches it
//! exhaustively. Outstanding HTTP calls live in [`Callouts`] and are dropped
//! when their owner reports `on_done` or is deleted.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::callouts::Callouts;
use crate::constants::ABI_VERSION;
use crate::traits::*;
use crate::types::*;

/// Context instance owned by the registry
enum Slot {
    Root(Box<dyn RootContext>),
    Stream {
        root_id: u32,
        context: Box<dyn StreamContext>,
    },
    Http {
        root_id: u32,
        context: Box<dyn HttpContext>,
    },
    /// Single-context mode: the root fields this child's callbacks
    ///
    /// `kind` is learned from the first stream or HTTP callback.
    Delegated {
        root_id: u32,
        kind: Option<ContextKind>,
    },
}

impl Slot {
    fn kind(&self) -> Option<ContextKind> {
        match self {
            Slot::Root(_) => Some(ContextKind::Root),
            Slot::Stream { .. } => Some(ContextKind::Stream),
            Slot::Http { .. } => Some(ContextKind::Http),
            Slot::Delegated { .. } => None,
        }
    }
}

/// Kind and root of a live context
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// `None` for delegated children
    kind: Option<ContextKind>,
    root_id: u32,
}

/// Context currently running a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Active {
    context_id: u32,
    kind: ContextKind,
}

/// Restores the previously active context when a callback returns
struct ActiveGuard<'a> {
    active: &'a Cell<Option<Active>>,
    previous: Option<Active>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.set(self.previous);
    }
}

/// Root used when the extension registers none
struct DefaultRoot;

impl Context for DefaultRoot {}
impl RootContext for DefaultRoot {}

struct Dispatcher {
    new_root: Cell<Option<NewRootContext>>,
    new_stream: Cell<Option<NewStreamContext>>,
    new_http: Cell<Option<NewHttpContext>>,
    contexts: RefCell<HashMap<u32, Slot>>,
    /// Readable while a callback holds `contexts`
    directory: RefCell<HashMap<u32, Entry>>,
    callouts: RefCell<Callouts>,
    active: Cell<Option<Active>>,
}

thread_local! {
    static DISPATCHER: Dispatcher = Dispatcher::new();
}

impl Dispatcher {
    fn new() -> Self {
        Self {
            new_root: Cell::new(None),
            new_stream: Cell::new(None),
            new_http: Cell::new(None),
            contexts: RefCell::new(HashMap::new()),
            directory: RefCell::new(HashMap::new()),
            callouts: RefCell::new(Callouts::new()),
            active: Cell::new(None),
        }
    }

    fn enter(&self, context_id: u32, kind: ContextKind) -> ActiveGuard<'_> {
        let previous = self.active.replace(Some(Active { context_id, kind }));
        ActiveGuard {
            active: &self.active,
            previous,
        }
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    fn create_context(&self, context_id: u32, root_context_id: u32) {
        if self.contexts.borrow().contains_key(&context_id) {
            log::error!(
                "[wasm:dispatch] context {} already exists, ignoring create",
                context_id
            );
            return;
        }

        let slot = if root_context_id == 0 {
            let root = match self.new_root.get() {
                Some(new_root) => new_root(context_id),
                None => Box::new(DefaultRoot),
            };
            Slot::Root(root)
        } else {
            match self.create_child(context_id, root_context_id) {
                Some(slot) => slot,
                None => return,
            }
        };

        log::debug!(
            "[wasm:dispatch] created context {} ({:?}) under root {}",
            context_id,
            slot.kind(),
            root_context_id
        );
        let root_id = if root_context_id == 0 {
            context_id
        } else {
            root_context_id
        };
        self.directory.borrow_mut().insert(
            context_id,
            Entry {
                kind: slot.kind(),
                root_id,
            },
        );
        self.contexts.borrow_mut().insert(context_id, slot);
    }

    fn create_child(&self, context_id: u32, root_id: u32) -> Option<Slot> {
        let child = {
            let mut contexts = self.contexts.borrow_mut();
            match contexts.get_mut(&root_id) {
                Some(Slot::Root(root)) => {
                    let _active = self.enter(root_id, ContextKind::Root);
                    root.on_create_child_context(context_id)
                }
                Some(Slot::Stream { .. } | Slot::Http { .. } | Slot::Delegated { .. }) | None => {
                    log::error!(
                        "[wasm:dispatch] context {} names unknown root {}",
                        context_id,
                        root_id
                    );
                    return None;
                }
            }
        };

        if let Some(child) = &child {
            log::debug!(
                "[wasm:dispatch] root {} spawned {:?} context {}",
                root_id,
                child.kind(),
                context_id
            );
        }

        Some(match child {
            Some(ChildContext::StreamContext(context)) => Slot::Stream { root_id, context },
            Some(ChildContext::HttpContext(context)) => Slot::Http { root_id, context },
            None => match (self.new_http.get(), self.new_stream.get()) {
                (Some(new_http), _) => Slot::Http {
                    root_id,
                    context: new_http(context_id, root_id),
                },
                (None, Some(new_stream)) => Slot::Stream {
                    root_id,
                    context: new_stream(context_id, root_id),
                },
                (None, None) => Slot::Delegated {
                    root_id,
                    kind: None,
                },
            },
        })
    }

    fn on_done(&self, context_id: u32) -> bool {
        let done = {
            let mut contexts = self.contexts.borrow_mut();
            if let Some((root_id, kind)) = delegation(&contexts, context_id) {
                match contexts.get_mut(&root_id) {
                    Some(Slot::Root(root)) => self.run_delegated(
                        root.as_mut(),
                        context_id,
                        kind,
                        true,
                        |stream| stream.on_done(),
                        |http| http.on_done(),
                    ),
                    _ => true,
                }
            } else {
                match contexts.get_mut(&context_id) {
                    Some(Slot::Root(root)) => {
                        let _active = self.enter(context_id, ContextKind::Root);
                        root.on_done()
                    }
                    Some(Slot::Stream { context, .. }) => {
                        let _active = self.enter(context_id, ContextKind::Stream);
                        context.on_done()
                    }
                    Some(Slot::Http { context, .. }) => {
                        let _active = self.enter(context_id, ContextKind::Http);
                        context.on_done()
                    }
                    Some(Slot::Delegated { .. }) => true,
                    None => {
                        log::warn!("[wasm:dispatch] on_done for unknown context {}", context_id);
                        true
                    }
                }
            }
        };
        self.abandon_callouts(context_id);
        done
    }

    fn on_delete(&self, context_id: u32) {
        self.directory.borrow_mut().remove(&context_id);
        if self.contexts.borrow_mut().remove(&context_id).is_none() {
            log::debug!("[wasm:dispatch] delete of unknown context {}", context_id);
        }
        self.abandon_callouts(context_id);
    }

    fn abandon_callouts(&self, context_id: u32) {
        let abandoned = self.callouts.borrow_mut().abandon(context_id);
        if !abandoned.is_empty() {
            log::debug!(
                "[wasm:dispatch] context {} torn down, abandoned http calls {:?}",
                context_id,
                abandoned
            );
        }
    }

    fn on_log(&self, context_id: u32) {
        let mut contexts = self.contexts.borrow_mut();
        if let Some((root_id, kind)) = delegation(&contexts, context_id) {
            if let Some(Slot::Root(root)) = contexts.get_mut(&root_id) {
                self.run_delegated(
                    root.as_mut(),
                    context_id,
                    kind,
                    (),
                    |stream| StreamContext::on_log(stream),
                    |http| HttpContext::on_log(http),
                );
            }
            return;
        }
        match contexts.get_mut(&context_id) {
            Some(Slot::Root(root)) => {
                let _active = self.enter(context_id, ContextKind::Root);
                RootContext::on_log(root.as_mut());
            }
            Some(Slot::Stream { context, .. }) => {
                let _active = self.enter(context_id, ContextKind::Stream);
                StreamContext::on_log(context.as_mut());
            }
            Some(Slot::Http { context, .. }) => {
                let _active = self.enter(context_id, ContextKind::Http);
                HttpContext::on_log(context.as_mut());
            }
            Some(Slot::Delegated { .. }) | None => {
                log::warn!("[wasm:dispatch] on_log for unknown context {}", context_id);
            }
        }
    }

    /// Run a child-level hook of a delegated child on its root
    ///
    /// A child that has not seen a callback yet goes to the HTTP hook when
    /// the root has one.
    fn run_delegated<R>(
        &self,
        root: &mut dyn RootContext,
        context_id: u32,
        kind: Option<ContextKind>,
        default: R,
        on_stream: impl FnOnce(&mut dyn StreamContext) -> R,
        on_http: impl FnOnce(&mut dyn HttpContext) -> R,
    ) -> R {
        let kind = kind.unwrap_or_else(|| {
            if root.as_http_context().is_some() {
                ContextKind::Http
            } else {
                ContextKind::Stream
            }
        });
        let _active = self.enter(context_id, kind);
        match kind {
            ContextKind::Stream => match root.as_stream_context() {
                Some(stream) => on_stream(stream),
                None => default,
            },
            ContextKind::Http | ContextKind::Root => match root.as_http_context() {
                Some(http) => on_http(http),
                None => default,
            },
        }
    }

    // ============================================================
    // Root callbacks
    // ============================================================

    fn with_root<R>(&self, context_id: u32, default: R, f: impl FnOnce(&mut dyn RootContext) -> R) -> R {
        let mut contexts = self.contexts.borrow_mut();
        match contexts.get_mut(&context_id) {
            Some(Slot::Root(root)) => {
                let _active = self.enter(context_id, ContextKind::Root);
                f(root.as_mut())
            }
            Some(Slot::Stream { .. } | Slot::Http { .. } | Slot::Delegated { .. }) | None => {
                log::warn!(
                    "[wasm:dispatch] root callback for non-root context {}",
                    context_id
                );
                default
            }
        }
    }

    // ============================================================
    // Stream / HTTP callbacks
    // ============================================================

    fn with_stream<R>(
        &self,
        context_id: u32,
        default: R,
        f: impl FnOnce(&mut dyn StreamContext) -> R,
    ) -> R {
        let mut contexts = self.contexts.borrow_mut();
        let target = match contexts.get_mut(&context_id) {
            Some(Slot::Delegated { root_id, kind }) => {
                kind.get_or_insert(ContextKind::Stream);
                *root_id
            }
            _ => context_id,
        };
        let _active = self.enter(context_id, ContextKind::Stream);
        match contexts.get_mut(&target) {
            Some(Slot::Stream { context, .. }) => f(context.as_mut()),
            Some(Slot::Root(root)) => match root.as_stream_context() {
                Some(context) => f(context),
                None => default,
            },
            Some(Slot::Http { .. } | Slot::Delegated { .. }) | None => {
                log::warn!(
                    "[wasm:dispatch] stream callback for non-stream context {}",
                    context_id
                );
                default
            }
        }
    }

    fn with_http<R>(
        &self,
        context_id: u32,
        default: R,
        f: impl FnOnce(&mut dyn HttpContext) -> R,
    ) -> R {
        let mut contexts = self.contexts.borrow_mut();
        let target = match contexts.get_mut(&context_id) {
            Some(Slot::Delegated { root_id, kind }) => {
                kind.get_or_insert(ContextKind::Http);
                *root_id
            }
            _ => context_id,
        };
        let _active = self.enter(context_id, ContextKind::Http);
        match contexts.get_mut(&target) {
            Some(Slot::Http { context, .. }) => f(context.as_mut()),
            Some(Slot::Root(root)) => match root.as_http_context() {
                Some(context) => f(context),
                None => default,
            },
            Some(Slot::Stream { .. } | Slot::Delegated { .. }) | None => {
                log::warn!(
                    "[wasm:dispatch] http callback for non-http context {}",
                    context_id
                );
                default
            }
        }
    }

    // ============================================================
    // HTTP call completion
    // ============================================================

    fn register_callout(&self, token: u32) -> bool {
        let context_id = match self.active.get() {
            Some(active) => active.context_id,
            None => {
                log::warn!(
                    "[wasm:dispatch] http call {} dispatched outside any callback",
                    token
                );
                0
            }
        };
        self.callouts.borrow_mut().register(token, context_id)
    }

    fn on_http_call_response(
        &self,
        context_id: u32,
        token: u32,
        num_headers: usize,
        body_size: usize,
        num_trailers: usize,
    ) {
        let Some(call) = self.callouts.borrow_mut().complete(token) else {
            log::debug!(
                "[wasm:dispatch] dropping response for unknown or abandoned http call {}",
                token
            );
            return;
        };
        if call.context_id != context_id {
            log::warn!(
                "[wasm:dispatch] http call {} issued by context {} delivered to {}",
                token,
                call.context_id,
                context_id
            );
        }

        let owner = call.context_id;
        let mut contexts = self.contexts.borrow_mut();
        let (target, delegated_kind) = match delegation(&contexts, owner) {
            Some((root_id, kind)) => (root_id, kind),
            None => (owner, None),
        };
        let Some(slot) = contexts.get_mut(&target) else {
            log::debug!(
                "[wasm:dispatch] owner {} of http call {} is gone",
                owner,
                token
            );
            return;
        };
        match slot {
            Slot::Root(root) => {
                let _active = self.enter(owner, delegated_kind.unwrap_or(ContextKind::Root));
                root.on_http_call_response(token, num_headers, body_size, num_trailers);
            }
            Slot::Stream { context, .. } => {
                let _active = self.enter(owner, ContextKind::Stream);
                context.on_http_call_response(token, num_headers, body_size, num_trailers);
            }
            Slot::Http { context, .. } => {
                let _active = self.enter(owner, ContextKind::Http);
                context.on_http_call_response(token, num_headers, body_size, num_trailers);
            }
            Slot::Delegated { .. } => {
                log::warn!(
                    "[wasm:dispatch] http call {} owner {} has no handler",
                    token,
                    owner
                );
            }
        }
    }
}

/// Root id and learned kind of a delegated child
fn delegation(contexts: &HashMap<u32, Slot>, context_id: u32) -> Option<(u32, Option<ContextKind>)> {
    match contexts.get(&context_id) {
        Some(Slot::Delegated { root_id, kind }) => Some((*root_id, *kind)),
        _ => None,
    }
}

// ============================================================
// Registration and introspection
// ============================================================

pub fn set_root_context(factory: NewRootContext) {
    DISPATCHER.with(|dispatcher| dispatcher.new_root.set(Some(factory)));
}

pub fn set_stream_context(factory: NewStreamContext) {
    DISPATCHER.with(|dispatcher| dispatcher.new_stream.set(Some(factory)));
}

pub fn set_http_context(factory: NewHttpContext) {
    DISPATCHER.with(|dispatcher| dispatcher.new_http.set(Some(factory)));
}

/// Kind of the callback currently running, if any
pub fn active_kind() -> Option<ContextKind> {
    DISPATCHER.with(|dispatcher| dispatcher.active.get().map(|active| active.kind))
}

/// Id of the context currently running a callback, if any
pub fn active_context_id() -> Option<u32> {
    DISPATCHER.with(|dispatcher| dispatcher.active.get().map(|active| active.context_id))
}

/// Kind of a live context; `None` for unknown or delegated ids
pub fn context_kind(context_id: u32) -> Option<ContextKind> {
    DISPATCHER.with(|dispatcher| {
        dispatcher
            .directory
            .borrow()
            .get(&context_id)
            .and_then(|entry| entry.kind)
    })
}

/// Root a context was created under (itself for a root)
pub fn root_context_id(context_id: u32) -> Option<u32> {
    DISPATCHER.with(|dispatcher| {
        dispatcher
            .directory
            .borrow()
            .get(&context_id)
            .map(|entry| entry.root_id)
    })
}

/// Outstanding HTTP calls of a context
pub fn pending_http_calls(context_id: u32) -> usize {
    DISPATCHER.with(|dispatcher| dispatcher.callouts.borrow().pending_for(context_id))
}

pub(crate) fn register_callout(token: u32) -> bool {
    DISPATCHER.with(|dispatcher| dispatcher.register_callout(token))
}

/// Follow a successful `proxy_set_effective_context` inside a callback
pub(crate) fn set_effective_context(context_id: u32) {
    DISPATCHER.with(|dispatcher| {
        // Outside a callback there is nothing to redirect
        let Some(current) = dispatcher.active.get() else {
            return;
        };
        let kind = dispatcher
            .directory
            .borrow()
            .get(&context_id)
            .and_then(|entry| entry.kind)
            .unwrap_or(current.kind);
        dispatcher.active.set(Some(Active { context_id, kind }));
    });
}

// ============================================================
// Exported entry points
// ============================================================

#[no_mangle]
pub extern "C" fn proxy_on_context_create(context_id: u32, root_context_id: u32) {
    DISPATCHER.with(|dispatcher| dispatcher.create_context(context_id, root_context_id));
}

#[no_mangle]
pub extern "C" fn proxy_on_vm_start(context_id: u32, vm_configuration_size: usize) -> bool {
    log::debug!(
        "[wasm:dispatch] vm start on root {} (abi {})",
        context_id,
        ABI_VERSION
    );
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_root(context_id, false, |root| root.on_vm_start(vm_configuration_size))
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_configure(context_id: u32, plugin_configuration_size: usize) -> bool {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_root(context_id, false, |root| {
            root.on_configure(plugin_configuration_size)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_tick(context_id: u32) {
    DISPATCHER.with(|dispatcher| dispatcher.with_root(context_id, (), |root| root.on_tick()));
}

#[no_mangle]
pub extern "C" fn proxy_on_queue_ready(context_id: u32, queue_id: u32) {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_root(context_id, (), |root| root.on_queue_ready(queue_id))
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_new_connection(context_id: u32) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_stream(context_id, Action::Continue, |stream| {
            stream.on_new_connection()
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_downstream_data(
    context_id: u32,
    data_size: usize,
    end_of_stream: u32,
) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_stream(context_id, Action::Continue, |stream| {
            stream.on_downstream_data(data_size, end_of_stream != 0)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_downstream_connection_close(context_id: u32, peer_type: u32) {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_stream(context_id, (), |stream| {
            stream.on_downstream_close(PeerType::from_raw(peer_type))
        })
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_upstream_data(
    context_id: u32,
    data_size: usize,
    end_of_stream: u32,
) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_stream(context_id, Action::Continue, |stream| {
            stream.on_upstream_data(data_size, end_of_stream != 0)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_upstream_connection_close(context_id: u32, peer_type: u32) {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_stream(context_id, (), |stream| {
            stream.on_upstream_close(PeerType::from_raw(peer_type))
        })
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_request_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: u32,
) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_http(context_id, Action::Continue, |http| {
            http.on_http_request_headers(num_headers, end_of_stream != 0)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_request_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: u32,
) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_http(context_id, Action::Continue, |http| {
            http.on_http_request_body(body_size, end_of_stream != 0)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_request_trailers(context_id: u32, num_trailers: usize) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_http(context_id, Action::Continue, |http| {
            http.on_http_request_trailers(num_trailers)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_response_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: u32,
) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_http(context_id, Action::Continue, |http| {
            http.on_http_response_headers(num_headers, end_of_stream != 0)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_response_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: u32,
) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_http(context_id, Action::Continue, |http| {
            http.on_http_response_body(body_size, end_of_stream != 0)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_response_trailers(context_id: u32, num_trailers: usize) -> Action {
    DISPATCHER.with(|dispatcher| {
        dispatcher.with_http(context_id, Action::Continue, |http| {
            http.on_http_response_trailers(num_trailers)
        })
    })
}

#[no_mangle]
pub extern "C" fn proxy_on_http_call_response(
    context_id: u32,
    token: u32,
    num_headers: usize,
    body_size: usize,
    num_trailers: usize,
) {
    DISPATCHER.with(|dispatcher| {
        dispatcher.on_http_call_response(context_id, token, num_headers, body_size, num_trailers)
    });
}

#[no_mangle]
pub extern "C" fn proxy_on_log(context_id: u32) {
    DISPATCHER.with(|dispatcher| dispatcher.on_log(context_id));
}

#[no_mangle]
pub extern "C" fn proxy_on_done(context_id: u32) -> bool {
    DISPATCHER.with(|dispatcher| dispatcher.on_done(context_id))
}

#[no_mangle]
pub extern "C" fn proxy_on_delete(context_id: u32) {
    DISPATCHER.with(|dispatcher| dispatcher.on_delete(context_id));
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::testing::FakeHost;
    use std::time::Duration;

    thread_local! {
        static EVENTS: RefCell<Vec<String>> = RefCell::new(Vec::new());
    }

    fn record(event: impl Into<String>) {
        EVENTS.with(|events| events.borrow_mut().push(event.into()));
    }

    fn events() -> Vec<String> {
        EVENTS.with(|events| events.borrow().clone())
    }

    struct Root;

    impl Context for Root {
        fn on_http_call_response(&mut self, token: u32, _: usize, body_size: usize, _: usize) {
            record(format!("root response {} {}", token, body_size));
        }
    }

    impl RootContext for Root {
        fn on_vm_start(&mut self, size: usize) -> bool {
            record(format!("vm_start {} {:?}", size, active_kind()));
            true
        }

        fn on_create_child_context(&mut self, context_id: u32) -> Option<ChildContext> {
            (context_id >= 100).then(|| ChildContext::StreamContext(Box::new(Tcp)))
        }
    }

    struct Exchange;

    impl Context for Exchange {
        fn on_http_call_response(&mut self, token: u32, _: usize, _: usize, _: usize) {
            record(format!("exchange response {}", token));
        }
    }

    impl HttpContext for Exchange {
        fn on_http_request_headers(&mut self, _: usize, _: bool) -> Action {
            record(format!("headers {:?}", active_kind()));
            let _ = self.dispatch_http_call("auth", &[], None, &[], Duration::from_secs(1));
            Action::Pause
        }
    }

    struct Tcp;

    impl Context for Tcp {}

    impl StreamContext for Tcp {
        fn on_downstream_data(&mut self, size: usize, end_of_stream: bool) -> Action {
            record(format!("downstream {} {}", size, end_of_stream));
            Action::Continue
        }
    }

    /// Root that also handles its children's HTTP callbacks
    struct Solo;

    impl Context for Solo {
        fn on_http_call_response(&mut self, token: u32, _: usize, _: usize, _: usize) {
            record(format!("solo response {} {:?}", token, active_kind()));
        }

        fn on_done(&mut self) -> bool {
            record(format!("solo done {:?}", active_kind()));
            false
        }
    }

    impl RootContext for Solo {
        fn as_http_context(&mut self) -> Option<&mut dyn HttpContext> {
            Some(self)
        }

        fn on_log(&mut self) {
            record("solo root log");
        }
    }

    impl HttpContext for Solo {
        fn on_http_request_headers(&mut self, num_headers: usize, end_of_stream: bool) -> Action {
            record(format!("solo headers {}", num_headers));
            if end_of_stream {
                let _ = self.dispatch_http_call("auth", &[], None, &[], Duration::from_secs(1));
            }
            Action::Pause
        }

        fn on_log(&mut self) {
            record(format!("solo http log {:?}", active_context_id()));
        }
    }

    #[test]
    fn test_default_root() {
        let host = FakeHost::new();
        host.install();
        assert!(host.start_vm(1, b""));
        assert_eq!(context_kind(1), Some(ContextKind::Root));
        assert!(host.configure(1, b"{}"));
    }

    #[test]
    fn test_child_creation_order() {
        let host = FakeHost::new();
        host.install();
        set_root_context(|_| Box::new(Root));
        set_stream_context(|_, _| Box::new(Tcp));
        set_http_context(|_, _| Box::new(Exchange));

        assert!(host.start_vm(1, b"abc"));
        assert_eq!(events(), vec!["vm_start 3 Some(Root)".to_string()]);

        host.create_context(2, 1);
        host.create_context(100, 1);
        assert_eq!(context_kind(2), Some(ContextKind::Http));
        assert_eq!(context_kind(100), Some(ContextKind::Stream));
        assert_eq!(root_context_id(100), Some(1));
    }

    #[test]
    fn test_stream_factory_without_http_factory() {
        let host = FakeHost::new();
        host.install();
        set_stream_context(|_, _| Box::new(Tcp));
        host.start_vm(1, b"");
        host.create_context(2, 1);
        assert_eq!(context_kind(2), Some(ContextKind::Stream));
        assert_eq!(host.downstream_data(2, b"ping", true), Action::Continue);
        assert_eq!(events(), vec!["downstream 4 true".to_string()]);
    }

    #[test]
    fn test_duplicate_context_is_ignored() {
        let host = FakeHost::new();
        host.install();
        set_http_context(|_, _| Box::new(Exchange));
        host.start_vm(1, b"");
        host.create_context(2, 1);
        host.create_context(2, 0);
        assert_eq!(context_kind(2), Some(ContextKind::Http));
    }

    #[test]
    fn test_orphan_child_is_rejected() {
        let host = FakeHost::new();
        host.install();
        host.create_context(5, 9);
        assert_eq!(context_kind(5), None);
        assert_eq!(root_context_id(5), None);
    }

    #[test]
    fn test_delegated_callbacks_reach_root() {
        let host = FakeHost::new();
        host.install();
        set_root_context(|_| Box::new(Solo));
        host.start_vm(1, b"");
        host.create_context(2, 1);

        assert_eq!(context_kind(2), None);
        assert_eq!(root_context_id(2), Some(1));
        assert_eq!(
            host.request_headers(2, &[("a", "1"), ("b", "2")], false),
            Action::Pause
        );
        assert_eq!(events(), vec!["solo headers 2".to_string()]);
        // No stream hook: the default applies
        assert_eq!(host.downstream_data(2, b"x", false), Action::Continue);
    }

    #[test]
    fn test_delegated_child_completion_and_teardown() {
        let host = FakeHost::new();
        host.install();
        set_root_context(|_| Box::new(Solo));
        host.start_vm(1, b"");
        host.create_context(2, 1);

        assert_eq!(host.request_headers(2, &[], true), Action::Pause);
        assert_eq!(pending_http_calls(2), 1);
        let token = host.http_calls()[0].token;
        assert!(host.http_call_response(token, &[], b"", &[]));

        host.log(2);
        assert!(!host.done(2));
        assert_eq!(
            events(),
            vec![
                "solo headers 0".to_string(),
                format!("solo response {} Some(Http)", token),
                "solo http log Some(2)".to_string(),
                "solo done Some(Http)".to_string(),
            ]
        );

        // The root's own hooks still run for the root
        host.log(1);
        assert_eq!(events().last().unwrap(), "solo root log");
    }

    #[test]
    fn test_completion_reaches_dispatcher() {
        let host = FakeHost::new();
        host.install();
        set_http_context(|_, _| Box::new(Exchange));
        host.start_vm(1, b"");
        host.create_context(2, 1);

        assert_eq!(host.request_headers(2, &[], false), Action::Pause);
        assert_eq!(pending_http_calls(2), 1);
        assert!(host.http_call_response(1, &[], b"ok", &[]));
        assert_eq!(pending_http_calls(2), 0);
        assert_eq!(
            events(),
            vec!["headers Some(Http)".to_string(), "exchange response 1".to_string()]
        );

        // A second delivery of the same token is dropped
        host.deliver_http_call_response(2, 1, &[], b"", &[]);
        assert_eq!(events().len(), 2);
    }

    #[test]
    fn test_done_abandons_outstanding_calls() {
        let host = FakeHost::new();
        host.install();
        set_http_context(|_, _| Box::new(Exchange));
        host.start_vm(1, b"");
        host.create_context(2, 1);
        host.request_headers(2, &[], false);
        assert_eq!(pending_http_calls(2), 1);

        assert!(host.done(2));
        assert_eq!(pending_http_calls(2), 0);
        host.deliver_http_call_response(2, 1, &[], b"late", &[]);
        assert_eq!(events(), vec!["headers Some(Http)".to_string()]);

        host.delete(2);
        assert_eq!(context_kind(2), None);
    }

    #[test]
    fn test_root_call_completion() {
        let host = FakeHost::new();
        host.install();
        set_root_context(|_| Box::new(Root));
        host.start_vm(1, b"");

        host.enter(1);
        let token = DISPATCHER.with(|dispatcher| {
            let _active = dispatcher.enter(1, ContextKind::Root);
            crate::hostcalls::dispatch_http_call("auth", &[], None, &[], Duration::from_secs(1))
        })
        .unwrap();
        assert_eq!(pending_http_calls(1), 1);
        assert!(host.http_call_response(token, &[("x", "y")], b"body", &[]));
        assert_eq!(events().last().unwrap(), &format!("root response {} 4", token));
    }

    #[test]
    fn test_active_context_is_restored() {
        DISPATCHER.with(|dispatcher| {
            assert_eq!(active_kind(), None);
            {
                let _outer = dispatcher.enter(1, ContextKind::Root);
                {
                    let _inner = dispatcher.enter(2, ContextKind::Http);
                    assert_eq!(active_context_id(), Some(2));
                }
                assert_eq!(active_kind(), Some(ContextKind::Root));
            }
            assert_eq!(active_context_id(), None);
        });
    }

    #[test]
    fn test_effective_context_switches_within_callback() {
        let host = FakeHost::new();
        host.install();
        set_http_context(|_, _| Box::new(Exchange));
        host.start_vm(1, b"");
        host.create_context(2, 1);

        DISPATCHER.with(|dispatcher| {
            let _active = dispatcher.enter(1, ContextKind::Root);
            set_effective_context(2);
            assert_eq!(active_context_id(), Some(2));
            assert_eq!(active_kind(), Some(ContextKind::Http));
            set_effective_context(7);
            assert_eq!(active_kind(), Some(ContextKind::Http));
        });
        assert_eq!(active_context_id(), None);

        // Outside a callback nothing is tracked
        set_effective_context(2);
        assert_eq!(active_context_id(), None);
    }
}
