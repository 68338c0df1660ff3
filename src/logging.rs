//! Helper macro enforcing consistent pipeline log fields.
//!
//! Keeps `event` and `pipe` present on every log emitted from the host and
//! consumer layers.

/// Log an event for a pipe (queue name) plus any extra display fields.
#[macro_export]
macro_rules! imagery_event {
    ($level:ident, $target:expr, $event:expr, pipe = $pipe:expr, mode = $mode:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            pipe = %$pipe,
            mode = %$mode,
            $($field = %$value,)*
        )
    };
    ($level:ident, $target:expr, $event:expr, pipe = $pipe:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            target: $target,
            event = $event,
            pipe = %$pipe,
            $($field = %$value,)*
        )
    };
}
