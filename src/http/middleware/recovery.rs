//! Panic recovery supervisor.
//!
//! Wraps the downstream chain and contains any panic to the request that
//! raised it. Panics carrying a transport error (broken pipe, connection reset)
//! are logged at info level and the connection is abandoned without a status
//! line. Any other panic is logged at error level and answered with a 500.
//!
//! A process-wide panic hook records the panic location, and the call stack
//! when requested, while a supervised future is being polled. Panics outside
//! supervision go to the previously installed hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::context;
use crate::http::middleware::unix_timestamp;

pub const RECOVERY_TARGET: &str = "panic_recovery";

/// Supervisor settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryConfig {
    /// Include the call stack in internal fault records.
    pub stack: bool,
}

/// How a caught panic is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The peer went away. No response can be written.
    TransportDisconnect,
    /// Anything else. Answered with 500.
    Internal,
}

/// Response extension set on every response produced by the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct Supervised;

/// Response extension telling the connection layer to drop the connection
/// without writing a response.
#[derive(Debug, Clone, Copy)]
pub struct Abandoned;

/// A panic caught while polling a supervised future.
#[derive(Debug)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
    pub location: Option<String>,
    pub stack: Option<String>,
}

impl Fault {
    fn new(payload: Box<dyn Any + Send>, site: Option<PanicSite>) -> Self {
        let (location, stack) = site.map(|s| (s.location, s.stack)).unwrap_or_default();
        Self {
            kind: classify(payload.as_ref()),
            message: panic_message(payload.as_ref()),
            location,
            stack,
        }
    }
}

#[derive(Debug)]
struct PanicSite {
    location: Option<String>,
    stack: Option<String>,
}

thread_local! {
    /// `Some(capture_stack)` while a supervised future is polled on this thread.
    static SCOPE: Cell<Option<bool>> = const { Cell::new(None) };
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| match SCOPE.with(Cell::get) {
            Some(capture_stack) => {
                let site = PanicSite {
                    location: info.location().map(ToString::to_string),
                    stack: capture_stack.then(|| Backtrace::force_capture().to_string()),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(site));
            }
            None => previous(info),
        }));
    });
}

/// Future adapter that turns a panic during `poll` into `Err(Fault)`.
pub struct Supervise<F> {
    inner: Pin<Box<F>>,
    capture_stack: bool,
}

impl<F: Future> Supervise<F> {
    pub fn new(inner: F, capture_stack: bool) -> Self {
        install_hook();
        Self {
            inner: Box::pin(inner),
            capture_stack,
        }
    }
}

impl<F: Future> Future for Supervise<F> {
    type Output = Result<F::Output, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let outer = SCOPE.with(|scope| scope.replace(Some(this.capture_stack)));
        let polled = panic::catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx)));
        SCOPE.with(|scope| scope.set(outer));

        match polled {
            Ok(poll) => poll.map(Ok),
            Err(payload) => {
                let site = LAST_PANIC.with(|slot| slot.borrow_mut().take());
                Poll::Ready(Err(Fault::new(payload, site)))
            }
        }
    }
}

/// Classify a panic payload.
pub fn classify(payload: &(dyn Any + Send)) -> FaultKind {
    let disconnect = if let Some(err) = payload.downcast_ref::<io::Error>() {
        is_disconnect(err)
    } else if let Some(err) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        is_disconnect(err.as_ref())
    } else {
        false
    };

    if disconnect {
        FaultKind::TransportDisconnect
    } else {
        FaultKind::Internal
    }
}

/// True if any error in the chain is a broken pipe or a connection reset.
pub fn is_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
            ) {
                return true;
            }
        }
        let message = err.to_string().to_lowercase();
        if message.contains("broken pipe") || message.contains("connection reset by peer") {
            return true;
        }
        current = err.source();
    }
    false
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else if let Some(err) = payload.downcast_ref::<io::Error>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn StdError + Send + Sync>>() {
        err.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Request line and headers, no body. Credentials are masked.
pub fn dump_request<B>(request: &Request<B>) -> String {
    let mut dump = format!(
        "{} {} {:?}\r\n",
        request.method(),
        request.uri(),
        request.version()
    );
    for (name, value) in request.headers() {
        if *name == header::AUTHORIZATION || *name == header::COOKIE {
            dump.push_str(&format!("{name}: *\r\n"));
        } else {
            dump.push_str(&format!("{name}: {}\r\n", String::from_utf8_lossy(value.as_bytes())));
        }
    }
    dump.push_str("\r\n");
    dump
}

/// Middleware containing panics raised by the downstream chain.
pub async fn recovery_middleware(
    State(config): State<RecoveryConfig>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let dump = dump_request(&request);
    let request_id = context::request_id(request.extensions()).to_string();

    let fault = match Supervise::new(next.run(request), config.stack).await {
        Ok(response) => return response,
        Err(fault) => fault,
    };

    match fault.kind {
        FaultKind::TransportDisconnect => {
            tracing::info!(
                target: RECOVERY_TARGET,
                request_id = %request_id,
                error = %fault.message,
                request = %dump,
                "Recovery from panic"
            );
            // the connection layer drops this response; the status only shows
            // when the router is served some other way
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            response.extensions_mut().insert(Supervised);
            response.extensions_mut().insert(Abandoned);
            response
        }
        FaultKind::Internal => {
            tracing::error!(
                target: RECOVERY_TARGET,
                time = unix_timestamp(),
                request_id = %request_id,
                error = %fault.message,
                location = fault.location.as_deref(),
                request = %dump,
                stack = fault.stack.as_deref(),
                "Recovery from panic"
            );
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            response.extensions_mut().insert(Supervised);
            response
        }
    }
}
