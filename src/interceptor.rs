//! Per-call hooks applied before the opening envelope is written.

use http::HeaderMap;

/// Observes or modifies the user headers of every outgoing call.
///
/// Interceptors run in registration order, for unary and streaming calls
/// alike, before the headers are flattened into the opening envelope. The
/// transport attaches no further semantics to them.
pub trait Interceptor: Send + Sync {
    /// Called once per call with the full method path and the mutable user
    /// header bag.
    fn on_request(&self, method: &str, headers: &mut HeaderMap);
}

impl<F> Interceptor for F
where
    F: Fn(&str, &mut HeaderMap) + Send + Sync,
{
    fn on_request(&self, method: &str, headers: &mut HeaderMap) {
        self(method, headers)
    }
}
