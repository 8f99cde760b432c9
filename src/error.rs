use failure::Fail;

/// Errors produced by the dispatch engine.
///
/// Handler-level errors (`ErrHandlerReturned` in the design notes) are not a
/// variant here: they are the handler's own boxed error, passed to `Done`
/// unchanged.
#[derive(Debug, Fail)]
pub enum DispatchError {
    #[fail(display = "invalid configuration: {}", _0)]
    Config(String),

    #[fail(display = "unknown queue '{}'", _0)]
    UnknownQueue(String),

    #[fail(display = "invalid message: {}", _0)]
    InvalidMessage(String),

    #[fail(display = "unknown job type '{}'", _0)]
    UnknownJobType(String),

    #[fail(display = "handler panicked: {}", _0)]
    HandlerPanic(String),

    #[fail(display = "source transport error: {}", _0)]
    Transport(String),

    #[fail(display = "source is closed")]
    SourceClosed,
}

/// Shortcut alias for `Result<T, DispatchError>`.
pub type Result<T> = ::std::result::Result<T, DispatchError>;
